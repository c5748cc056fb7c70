//! Property tests for the admission controller bounds

use proptest::prelude::*;
use proxy_speedtest::executor::{AdmissionConfig, AdmissionController, AdmissionSnapshot, PhaseKind, SystemResources};
use std::time::Duration;

fn phase_kind() -> impl Strategy<Value = PhaseKind> {
    prop_oneof![Just(PhaseKind::Latency), Just(PhaseKind::Throughput)]
}

/// One reported probe outcome: `Some(metric)` for success
fn outcome() -> impl Strategy<Value = Option<f64>> {
    prop_oneof![
        3 => (1.0f64..5000.0).prop_map(Some),
        1 => Just(None),
    ]
}

fn check_bounds(snapshot: &AdmissionSnapshot, ceiling: usize) -> Result<(), TestCaseError> {
    prop_assert!(snapshot.min_limit >= 1);
    prop_assert!(snapshot.min_limit <= snapshot.max_limit);
    prop_assert!(snapshot.max_limit <= ceiling);
    prop_assert!(snapshot.limit >= snapshot.min_limit);
    prop_assert!(snapshot.limit <= snapshot.max_limit);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn limit_stays_within_bounds(
        kind in phase_kind(),
        min in 0usize..20,
        max in 0usize..400,
        initial in 0usize..600,
        total in 0usize..1000,
        cores in 1usize..64,
        outcomes in prop::collection::vec(outcome(), 0..300),
        adjust_every in 1usize..10,
    ) {
        let mut config = AdmissionConfig::adaptive(kind)
            .with_initial_limit(initial)
            .with_stagger(Duration::ZERO);
        config.min_limit = min;
        config.max_limit = max;

        let controller = AdmissionController::with_resources(config, total, &SystemResources::from_cores(cores));
        let ceiling = total.max(1);

        check_bounds(&controller.snapshot(), ceiling)?;

        for (i, outcome) in outcomes.iter().enumerate() {
            match outcome {
                Some(metric) => controller.report_success(*metric),
                None => controller.report_failure(),
            }
            if (i + 1) % adjust_every == 0 {
                controller.maybe_adjust();
                check_bounds(&controller.snapshot(), ceiling)?;
            }
        }
        controller.maybe_adjust();
        check_bounds(&controller.snapshot(), ceiling)?;
    }

    #[test]
    fn fixed_pool_never_moves(
        kind in phase_kind(),
        size in 0usize..200,
        total in 0usize..500,
        outcomes in prop::collection::vec(outcome(), 0..100),
    ) {
        let controller = AdmissionController::with_resources(
            AdmissionConfig::fixed(kind, size),
            total,
            &SystemResources::from_cores(4),
        );
        let expected = size.max(1).min(total.max(1));
        prop_assert_eq!(controller.current_concurrency(), expected);

        for outcome in outcomes {
            match outcome {
                Some(metric) => controller.report_success(metric),
                None => controller.report_failure(),
            }
            controller.maybe_adjust();
        }
        prop_assert_eq!(controller.current_concurrency(), expected);
        prop_assert!(controller.is_fixed());
    }

    #[test]
    fn all_failures_never_drop_below_one(
        kind in phase_kind(),
        initial in 1usize..300,
        failures in 1usize..200,
    ) {
        let config = AdmissionConfig::adaptive(kind)
            .with_initial_limit(initial)
            .with_stagger(Duration::ZERO);
        let controller = AdmissionController::with_resources(config, 1000, &SystemResources::from_cores(8));

        for _ in 0..failures {
            controller.report_failure();
            controller.maybe_adjust();
        }
        prop_assert!(controller.current_concurrency() >= 1);
    }
}
