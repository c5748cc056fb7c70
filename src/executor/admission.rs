//! Admission control for probe phases
//!
//! One [`AdmissionController`] governs one phase of one run. In adaptive mode
//! the in-flight limit follows an additive-increase / multiplicative-decrease
//! rule driven by the outcomes reported by the phase; in fixed mode a plain
//! counting semaphore is used and reports are ignored. Both modes hand out an
//! [`AdmissionPermit`] that frees its slot when dropped.

use serde::Serialize;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex, MutexGuard},
    time::{Duration, Instant},
};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

/// Hard ceiling for latency probes in flight
pub const LATENCY_HARD_CAP: usize = 256;
/// Hard ceiling for throughput probes in flight
pub const THROUGHPUT_HARD_CAP: usize = 32;

/// Window failure rate above which the limit is cut
const DECREASE_FAILURE_RATE: f64 = 0.5;
/// Window failure rate at or below which the limit may grow
const INCREASE_FAILURE_RATE: f64 = 0.2;
/// Consecutive failures that force a cut regardless of the window
const CONSECUTIVE_FAILURE_TRIGGER: usize = 3;
/// Samples needed before the metric trend is trusted
const TREND_MIN_SAMPLES: usize = 3;

/// The two kinds of phase a run executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseKind {
    Latency,
    Throughput,
}

impl PhaseKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKind::Latency => "latency",
            PhaseKind::Throughput => "throughput",
        }
    }

    pub fn hard_cap(&self) -> usize {
        match self {
            PhaseKind::Latency => LATENCY_HARD_CAP,
            PhaseKind::Throughput => THROUGHPUT_HARD_CAP,
        }
    }

    /// Additive increase applied on a healthy window
    pub fn increase_step(&self) -> usize {
        match self {
            PhaseKind::Latency => 4,
            PhaseKind::Throughput => 1,
        }
    }

    /// Spacing between consecutive grants
    pub fn stagger(&self) -> Duration {
        match self {
            PhaseKind::Latency => Duration::from_millis(2),
            PhaseKind::Throughput => Duration::from_millis(20),
        }
    }

    /// Completed probes between two `maybe_adjust` calls
    pub fn adjust_every(&self) -> usize {
        match self {
            PhaseKind::Latency => 5,
            PhaseKind::Throughput => 3,
        }
    }

    /// Outcomes kept in the rolling window
    fn window_size(&self) -> usize {
        match self {
            PhaseKind::Latency => 20,
            PhaseKind::Throughput => 9,
        }
    }

    /// Latency is better when lower, throughput when higher
    fn higher_is_better(&self) -> bool {
        matches!(self, PhaseKind::Throughput)
    }
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// System resources used to seed the automatic limit
#[derive(Debug, Clone)]
pub struct SystemResources {
    /// Number of logical CPU cores
    pub cpu_cores: usize,
    /// Baseline concurrency for I/O bound work
    pub optimal_concurrency: usize,
}

impl SystemResources {
    /// Detect system resources and calculate the baseline concurrency
    pub fn detect() -> Self {
        Self::from_cores(num_cpus::get())
    }

    pub fn from_cores(cpu_cores: usize) -> Self {
        // 2x cores for I/O bound probes, kept within a sane band
        let optimal_concurrency = (cpu_cores * 2).clamp(4, 50);
        Self {
            cpu_cores,
            optimal_concurrency,
        }
    }

    /// Automatic starting limit for a phase before clamping to the target count
    pub fn initial_limit(&self, kind: PhaseKind) -> usize {
        match kind {
            PhaseKind::Latency => self.optimal_concurrency * 4,
            PhaseKind::Throughput => (self.optimal_concurrency / 2).max(2),
        }
    }
}

/// Settings for one phase's controller
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdmissionConfig {
    pub kind: PhaseKind,
    /// Fixed pool size; `None` selects adaptive mode
    pub fixed: Option<usize>,
    pub min_limit: usize,
    pub max_limit: usize,
    /// Starting limit; `None` derives it from the CPU count
    pub initial_limit: Option<usize>,
    pub increase_step: usize,
    pub decrease_factor: f64,
    pub window: usize,
    pub stagger: Duration,
    pub adjust_every: usize,
}

impl AdmissionConfig {
    /// Adaptive settings for a phase
    pub fn adaptive(kind: PhaseKind) -> Self {
        Self {
            kind,
            fixed: None,
            min_limit: 1,
            max_limit: kind.hard_cap(),
            initial_limit: None,
            increase_step: kind.increase_step(),
            decrease_factor: 0.5,
            window: kind.window_size(),
            stagger: kind.stagger(),
            adjust_every: kind.adjust_every(),
        }
    }

    /// Fixed-size settings for a phase
    pub fn fixed(kind: PhaseKind, size: usize) -> Self {
        Self {
            fixed: Some(size),
            ..Self::adaptive(kind)
        }
    }

    /// Settings from a profile concurrency value, where 0 means adaptive
    pub fn from_concurrency(kind: PhaseKind, concurrency: usize) -> Self {
        if concurrency > 0 {
            Self::fixed(kind, concurrency)
        } else {
            Self::adaptive(kind)
        }
    }

    pub fn with_initial_limit(mut self, initial: usize) -> Self {
        self.initial_limit = Some(initial);
        self
    }

    pub fn with_stagger(mut self, stagger: Duration) -> Self {
        self.stagger = stagger;
        self
    }

    pub fn is_fixed(&self) -> bool {
        self.fixed.is_some()
    }

    /// Clamp bounds against each other and the number of targets.
    ///
    /// Returns `(min, max, initial)` with `1 <= min <= initial <= max <= max(total, 1)`.
    fn resolve_bounds(&self, total: usize, resources: &SystemResources) -> (usize, usize, usize) {
        let ceiling = total.max(1);
        let max = self.max_limit.max(1).min(ceiling);
        let min = self.min_limit.max(1).min(max);
        let initial = self
            .initial_limit
            .unwrap_or_else(|| resources.initial_limit(self.kind))
            .clamp(min, max);
        (min, max, initial)
    }
}

/// Direction of the reported metric over the recent window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricTrend {
    Unknown,
    Improving,
    Stable,
    Degrading,
}

/// What a call to `maybe_adjust` did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Adjustment {
    Unchanged,
    Increased { from: usize, to: usize },
    Decreased { from: usize, to: usize },
    /// Limit sat above its maximum and was pulled back
    Clamped { from: usize, to: usize },
}

/// Point-in-time view of a controller
#[derive(Debug, Clone, Serialize)]
pub struct AdmissionSnapshot {
    pub kind: PhaseKind,
    pub fixed: bool,
    pub limit: usize,
    pub min_limit: usize,
    pub max_limit: usize,
    pub in_flight: usize,
    pub peak_in_flight: usize,
    pub failure_rate: f64,
    pub trend: MetricTrend,
    pub adjustments: usize,
}

/// Fast/slow moving averages of the reported metric
#[derive(Debug)]
struct TrendEstimator {
    fast: Option<f64>,
    slow: Option<f64>,
    samples: usize,
    higher_is_better: bool,
}

impl TrendEstimator {
    fn new(higher_is_better: bool) -> Self {
        Self {
            fast: None,
            slow: None,
            samples: 0,
            higher_is_better,
        }
    }

    fn observe(&mut self, value: f64) {
        if !value.is_finite() || value < 0.0 {
            return;
        }
        self.fast = Some(match self.fast {
            Some(prev) => prev * 0.5 + value * 0.5,
            None => value,
        });
        self.slow = Some(match self.slow {
            Some(prev) => prev * 0.9 + value * 0.1,
            None => value,
        });
        self.samples += 1;
    }

    fn trend(&self) -> MetricTrend {
        let (Some(fast), Some(slow)) = (self.fast, self.slow) else {
            return MetricTrend::Unknown;
        };
        if self.samples < TREND_MIN_SAMPLES || slow <= f64::EPSILON {
            return MetricTrend::Unknown;
        }

        let ratio = fast / slow;
        if self.higher_is_better {
            if ratio < 0.75 {
                MetricTrend::Degrading
            } else if ratio > 1.1 {
                MetricTrend::Improving
            } else {
                MetricTrend::Stable
            }
        } else if ratio > 1.33 {
            MetricTrend::Degrading
        } else if ratio < 0.9 {
            MetricTrend::Improving
        } else {
            MetricTrend::Stable
        }
    }
}

/// Mutable state of an adaptive controller
#[derive(Debug)]
struct AdaptiveState {
    limit: usize,
    min: usize,
    max: usize,
    in_flight: usize,
    peak_in_flight: usize,
    outcomes: VecDeque<bool>,
    window: usize,
    consecutive_successes: usize,
    consecutive_failures: usize,
    trend: TrendEstimator,
    last_adjustment: Option<Instant>,
    adjustments: usize,
}

impl AdaptiveState {
    fn record(&mut self, success: bool) {
        self.outcomes.push_back(success);
        while self.outcomes.len() > self.window {
            self.outcomes.pop_front();
        }
        if success {
            self.consecutive_successes += 1;
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            self.consecutive_successes = 0;
        }
    }

    fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        let failures = self.outcomes.iter().filter(|ok| !**ok).count();
        failures as f64 / self.outcomes.len() as f64
    }
}

enum Backend {
    Adaptive {
        state: Mutex<AdaptiveState>,
        notify: Notify,
    },
    Fixed {
        semaphore: Arc<Semaphore>,
        size: usize,
        peak_in_flight: Mutex<usize>,
    },
}

/// Bounds the number of in-flight probes for one phase
pub struct AdmissionController {
    config: AdmissionConfig,
    backend: Backend,
    next_grant: Mutex<Option<Instant>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panicking probe must not wedge admission for the rest of the run
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl AdmissionController {
    /// Create a controller for `total` targets using detected system resources
    pub fn new(config: AdmissionConfig, total: usize) -> Arc<Self> {
        Self::with_resources(config, total, &SystemResources::detect())
    }

    pub fn with_resources(config: AdmissionConfig, total: usize, resources: &SystemResources) -> Arc<Self> {
        let backend = match config.fixed {
            Some(size) => {
                let size = size.max(1).min(total.max(1));
                Backend::Fixed {
                    semaphore: Arc::new(Semaphore::new(size)),
                    size,
                    peak_in_flight: Mutex::new(0),
                }
            }
            None => {
                let (min, max, initial) = config.resolve_bounds(total, resources);
                Backend::Adaptive {
                    state: Mutex::new(AdaptiveState {
                        limit: initial,
                        min,
                        max,
                        in_flight: 0,
                        peak_in_flight: 0,
                        outcomes: VecDeque::with_capacity(config.window.max(1)),
                        window: config.window.max(1),
                        consecutive_successes: 0,
                        consecutive_failures: 0,
                        trend: TrendEstimator::new(config.kind.higher_is_better()),
                        last_adjustment: None,
                        adjustments: 0,
                    }),
                    notify: Notify::new(),
                }
            }
        };

        Arc::new(Self {
            config,
            backend,
            next_grant: Mutex::new(None),
        })
    }

    pub fn kind(&self) -> PhaseKind {
        self.config.kind
    }

    pub fn config(&self) -> &AdmissionConfig {
        &self.config
    }

    pub fn is_fixed(&self) -> bool {
        matches!(self.backend, Backend::Fixed { .. })
    }

    /// Current in-flight limit
    pub fn current_concurrency(&self) -> usize {
        match &self.backend {
            Backend::Adaptive { state, .. } => lock(state).limit,
            Backend::Fixed { size, .. } => *size,
        }
    }

    /// Probes currently holding a permit
    pub fn in_flight(&self) -> usize {
        match &self.backend {
            Backend::Adaptive { state, .. } => lock(state).in_flight,
            Backend::Fixed { semaphore, size, .. } => size.saturating_sub(semaphore.available_permits()),
        }
    }

    /// Wait for a slot, then wait out the stagger delay.
    ///
    /// Returns `None` without holding a slot once `cancel` fires.
    pub async fn acquire_with_delay(self: &Arc<Self>, cancel: &CancellationToken) -> Option<AdmissionPermit> {
        if cancel.is_cancelled() {
            return None;
        }

        let permit = match &self.backend {
            Backend::Adaptive { state, notify } => loop {
                let notified = notify.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                {
                    let mut state = lock(state);
                    if state.in_flight < state.limit {
                        state.in_flight += 1;
                        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
                        break AdmissionPermit {
                            controller: Arc::clone(self),
                            fixed: None,
                            released: false,
                        };
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    _ = &mut notified => {}
                }
            },
            Backend::Fixed {
                semaphore,
                peak_in_flight,
                size,
            } => {
                let acquired = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return None,
                    acquired = Arc::clone(semaphore).acquire_owned() => acquired,
                };
                // The semaphore is never closed, so an error here means the run is over
                let owned = acquired.ok()?;
                let in_use = size.saturating_sub(semaphore.available_permits());
                {
                    let mut peak = lock(peak_in_flight);
                    *peak = (*peak).max(in_use);
                }
                AdmissionPermit {
                    controller: Arc::clone(self),
                    fixed: Some(owned),
                    released: false,
                }
            }
        };

        let delay = self.reserve_grant_slot();
        if !delay.is_zero() {
            tokio::select! {
                biased;
                // Dropping the permit hands the slot straight back
                _ = cancel.cancelled() => return None,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        Some(permit)
    }

    /// Book the next grant time and return how long this grant must wait
    fn reserve_grant_slot(&self) -> Duration {
        if self.config.stagger.is_zero() {
            return Duration::ZERO;
        }
        let now = Instant::now();
        let mut next = lock(&self.next_grant);
        let at = match *next {
            Some(t) if t > now => t,
            _ => now,
        };
        *next = Some(at + self.config.stagger);
        at - now
    }

    /// Return an adaptive slot. Permits call this on drop.
    pub fn release_dynamic(&self) {
        if let Backend::Adaptive { state, notify } = &self.backend {
            let mut state = lock(state);
            state.in_flight = state.in_flight.saturating_sub(1);
            let has_room = state.in_flight < state.limit;
            drop(state);
            if has_room {
                notify.notify_one();
            }
        }
    }

    /// Feed a successful probe and its metric (latency ms or MB/s)
    pub fn report_success(&self, metric: f64) {
        if let Backend::Adaptive { state, .. } = &self.backend {
            let mut state = lock(state);
            state.record(true);
            state.trend.observe(metric);
        }
    }

    pub fn report_failure(&self) {
        if let Backend::Adaptive { state, .. } = &self.backend {
            lock(state).record(false);
        }
    }

    /// Re-evaluate the limit from the rolling window
    pub fn maybe_adjust(&self) -> Adjustment {
        let Backend::Adaptive { state, notify } = &self.backend else {
            return Adjustment::Unchanged;
        };

        let mut state = lock(state);
        let from = state.limit;

        let adjustment = if state.limit > state.max {
            state.limit = state.max;
            Adjustment::Clamped { from, to: state.limit }
        } else if state.outcomes.is_empty() {
            Adjustment::Unchanged
        } else {
            let failure_rate = state.failure_rate();
            if failure_rate > DECREASE_FAILURE_RATE || state.consecutive_failures >= CONSECUTIVE_FAILURE_TRIGGER {
                let scaled = (from as f64 * self.config.decrease_factor).floor() as usize;
                let to = scaled.min(from.saturating_sub(1)).max(state.min);
                state.limit = to;
                // Fresh window after every decrease
                state.outcomes.clear();
                state.consecutive_failures = 0;
                if to < from {
                    Adjustment::Decreased { from, to }
                } else {
                    Adjustment::Unchanged
                }
            } else if failure_rate <= INCREASE_FAILURE_RATE
                && state.trend.trend() != MetricTrend::Degrading
                && state.limit < state.max
            {
                let to = (from + self.config.increase_step.max(1)).min(state.max);
                state.limit = to;
                Adjustment::Increased { from, to }
            } else {
                Adjustment::Unchanged
            }
        };

        if adjustment != Adjustment::Unchanged {
            state.last_adjustment = Some(Instant::now());
            state.adjustments += 1;
        }
        let grew = matches!(adjustment, Adjustment::Increased { .. });
        drop(state);

        if grew {
            notify.notify_waiters();
        }
        adjustment
    }

    pub fn snapshot(&self) -> AdmissionSnapshot {
        match &self.backend {
            Backend::Adaptive { state, .. } => {
                let state = lock(state);
                AdmissionSnapshot {
                    kind: self.config.kind,
                    fixed: false,
                    limit: state.limit,
                    min_limit: state.min,
                    max_limit: state.max,
                    in_flight: state.in_flight,
                    peak_in_flight: state.peak_in_flight,
                    failure_rate: state.failure_rate(),
                    trend: state.trend.trend(),
                    adjustments: state.adjustments,
                }
            }
            Backend::Fixed {
                semaphore,
                size,
                peak_in_flight,
            } => AdmissionSnapshot {
                kind: self.config.kind,
                fixed: true,
                limit: *size,
                min_limit: *size,
                max_limit: *size,
                in_flight: size.saturating_sub(semaphore.available_permits()),
                peak_in_flight: *lock(peak_in_flight),
                failure_rate: 0.0,
                trend: MetricTrend::Unknown,
                adjustments: 0,
            },
        }
    }

    #[cfg(test)]
    fn force_limit(&self, limit: usize) {
        if let Backend::Adaptive { state, .. } = &self.backend {
            lock(state).limit = limit;
        }
    }
}

/// A granted admission slot; the slot is returned on drop
pub struct AdmissionPermit {
    controller: Arc<AdmissionController>,
    fixed: Option<OwnedSemaphorePermit>,
    released: bool,
}

impl AdmissionPermit {
    pub fn controller(&self) -> &Arc<AdmissionController> {
        &self.controller
    }
}

impl Drop for AdmissionPermit {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match self.fixed.take() {
            Some(owned) => drop(owned),
            None => self.controller.release_dynamic(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adaptive(kind: PhaseKind, initial: usize) -> AdmissionConfig {
        AdmissionConfig::adaptive(kind)
            .with_initial_limit(initial)
            .with_stagger(Duration::ZERO)
    }

    #[test]
    fn test_seeding_is_clamped_to_targets() {
        let resources = SystemResources::from_cores(8);
        let controller = AdmissionController::with_resources(AdmissionConfig::adaptive(PhaseKind::Latency), 10, &resources);
        assert_eq!(controller.current_concurrency(), 10);

        let controller = AdmissionController::with_resources(AdmissionConfig::adaptive(PhaseKind::Throughput), 1000, &resources);
        assert_eq!(controller.current_concurrency(), 8);
        assert!(controller.current_concurrency() <= THROUGHPUT_HARD_CAP);
    }

    #[test]
    fn test_misconfiguration_is_clamped() {
        let resources = SystemResources::from_cores(2);
        let mut config = AdmissionConfig::adaptive(PhaseKind::Latency);
        config.min_limit = 0;
        config.max_limit = 0;
        config.initial_limit = Some(500);
        let controller = AdmissionController::with_resources(config, 50, &resources);
        let snap = controller.snapshot();
        assert_eq!(snap.min_limit, 1);
        assert_eq!(snap.max_limit, 1);
        assert_eq!(snap.limit, 1);

        let fixed = AdmissionController::with_resources(AdmissionConfig::fixed(PhaseKind::Latency, 0), 5, &resources);
        assert_eq!(fixed.current_concurrency(), 1);
        let fixed = AdmissionController::with_resources(AdmissionConfig::fixed(PhaseKind::Latency, 64), 5, &resources);
        assert_eq!(fixed.current_concurrency(), 5);
    }

    #[test]
    fn test_additive_increase_on_healthy_window() {
        let controller = AdmissionController::new(adaptive(PhaseKind::Latency, 8), 100);
        for _ in 0..5 {
            controller.report_success(50.0);
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Increased { from: 8, to: 12 });

        let controller = AdmissionController::new(adaptive(PhaseKind::Throughput, 2), 100);
        for _ in 0..3 {
            controller.report_success(5.0);
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Increased { from: 2, to: 3 });
    }

    #[test]
    fn test_multiplicative_decrease_on_failures() {
        let controller = AdmissionController::new(adaptive(PhaseKind::Latency, 16), 100);
        controller.report_success(40.0);
        for _ in 0..3 {
            controller.report_failure();
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Decreased { from: 16, to: 8 });
    }

    #[test]
    fn test_decrease_is_at_least_one_and_never_below_min() {
        let mut config = adaptive(PhaseKind::Throughput, 3);
        config.decrease_factor = 0.99;
        let controller = AdmissionController::new(config, 100);
        for _ in 0..3 {
            controller.report_failure();
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Decreased { from: 3, to: 2 });

        let controller = AdmissionController::new(adaptive(PhaseKind::Latency, 1), 100);
        for _ in 0..10 {
            controller.report_failure();
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Unchanged);
        assert_eq!(controller.current_concurrency(), 1);
    }

    #[test]
    fn test_above_max_is_pulled_back() {
        let controller = AdmissionController::new(adaptive(PhaseKind::Throughput, 4), 10);
        controller.force_limit(40);
        assert_eq!(controller.maybe_adjust(), Adjustment::Clamped { from: 40, to: 10 });
    }

    #[test]
    fn test_degrading_trend_blocks_increase() {
        let controller = AdmissionController::new(adaptive(PhaseKind::Latency, 8), 100);
        for latency in [50.0, 50.0, 50.0, 50.0, 400.0, 800.0] {
            controller.report_success(latency);
        }
        assert_eq!(controller.snapshot().trend, MetricTrend::Degrading);
        assert_eq!(controller.maybe_adjust(), Adjustment::Unchanged);
    }

    #[test]
    fn test_fixed_mode_ignores_reports() {
        let controller = AdmissionController::new(AdmissionConfig::fixed(PhaseKind::Latency, 3), 10);
        for _ in 0..10 {
            controller.report_failure();
        }
        assert_eq!(controller.maybe_adjust(), Adjustment::Unchanged);
        assert_eq!(controller.current_concurrency(), 3);
        assert!(controller.is_fixed());
    }

    #[tokio::test]
    async fn test_permits_bound_in_flight() {
        let controller = AdmissionController::new(adaptive(PhaseKind::Latency, 2), 10);
        let cancel = CancellationToken::new();

        let first = controller.acquire_with_delay(&cancel).await.unwrap();
        let _second = controller.acquire_with_delay(&cancel).await.unwrap();
        assert_eq!(controller.in_flight(), 2);

        let waiter = {
            let controller = Arc::clone(&controller);
            let cancel = cancel.clone();
            tokio::spawn(async move { controller.acquire_with_delay(&cancel).await.is_some() })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        assert!(waiter.await.unwrap());
        assert_eq!(controller.snapshot().peak_in_flight, 2);
    }

    #[tokio::test]
    async fn test_cancellation_releases_waiters() {
        for config in [adaptive(PhaseKind::Latency, 1), AdmissionConfig::fixed(PhaseKind::Latency, 1)] {
            let controller = AdmissionController::new(config, 10);
            let cancel = CancellationToken::new();
            let held = controller.acquire_with_delay(&cancel).await.unwrap();

            let waiter = {
                let controller = Arc::clone(&controller);
                let cancel = cancel.clone();
                tokio::spawn(async move { controller.acquire_with_delay(&cancel).await.is_none() })
            };
            tokio::time::sleep(Duration::from_millis(10)).await;
            cancel.cancel();
            assert!(waiter.await.unwrap());

            drop(held);
            assert_eq!(controller.in_flight(), 0);
            assert!(controller.acquire_with_delay(&cancel).await.is_none());
        }
    }

    #[tokio::test]
    async fn test_stagger_spaces_grants() {
        let config = AdmissionConfig::adaptive(PhaseKind::Throughput)
            .with_initial_limit(4)
            .with_stagger(Duration::from_millis(20));
        let controller = AdmissionController::new(config, 4);
        let cancel = CancellationToken::new();

        let start = Instant::now();
        let mut permits = Vec::new();
        for _ in 0..3 {
            permits.push(controller.acquire_with_delay(&cancel).await.unwrap());
        }
        assert!(start.elapsed() >= Duration::from_millis(40));
    }
}
