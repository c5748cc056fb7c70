//! Shared completion path for every way a run can end

use super::{Collaborators, RunSummary};
use crate::executor::{PhaseContext, PhaseReport};
use crate::models::{SpeedTestResult, Target};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::task::TaskTracker;

/// How the run body ended
pub(crate) enum RunEnd {
    Finished,
    /// The run body panicked; carries the panic message
    Faulted(String),
}

/// Persist, report and trigger follow-ups. Called exactly once per run.
///
/// Host upserts and hooks are spawned on `side_effects` and not awaited.
pub(crate) async fn finish_run(
    ctx: &Arc<PhaseContext>,
    collab: &Collaborators,
    side_effects: &TaskTracker,
    started_at: DateTime<Utc>,
    phases: Vec<PhaseReport>,
    end: RunEnd,
) -> RunSummary {
    let cancelled = ctx.cancel.is_cancelled();

    // Survivors that never got a throughput probe keep their latency
    ctx.sink.fill_latency_only(&ctx.targets);
    let rows = ctx.sink.rows();

    let mut persisted = true;
    if !rows.is_empty() {
        if let Err(e) = collab.catalog.batch_update_speed_results(&rows).await {
            persisted = false;
            ctx.logger.side_effect_failed("result persistence", &e).await;
        }
    }

    let hosts = ctx.sink.hosts();
    if !hosts.is_empty() {
        let catalog = Arc::clone(&collab.catalog);
        let logger = ctx.logger.clone();
        side_effects.spawn(async move {
            match catalog.batch_upsert_hosts(&hosts).await {
                Ok(count) => {
                    logger
                        .entry(crate::logging::LogLevel::Debug, &format!("Upserted {} host mappings", count))
                        .field("hosts", count)
                        .log()
                        .await
                }
                Err(e) => logger.side_effect_failed("host mapping upsert", &e).await,
            }
        });
    }

    let traffic = ctx.traffic.snapshot().await;
    let success = rows.iter().filter(|r| r.is_success()).count();
    let fail = rows.len() - success;
    let finished_at = Utc::now();

    let error = match &end {
        RunEnd::Finished => None,
        RunEnd::Faulted(message) => Some(message.clone()),
    };

    let summary = RunSummary {
        task_id: ctx.progress.task_id().map(String::from),
        correlation_id: ctx.logger.correlation_id().to_string(),
        profile_id: ctx.run.profile_id,
        mode: ctx.run.mode,
        total: ctx.targets.len(),
        success,
        fail,
        cancelled,
        failed: error.is_some(),
        error,
        persisted,
        traffic,
        phases,
        started_at,
        finished_at,
        elapsed_ms: (finished_at - started_at).num_milliseconds().max(0) as u64,
        results: rows,
    };

    let reported = match &summary.error {
        Some(message) => ctx.progress.fail(&format!("Speed test failed: {}", message)).await,
        None => {
            let payload = serde_json::json!({
                "success": summary.success,
                "fail": summary.fail,
                "total": summary.total,
                "traffic": summary.traffic.formatted_total(),
                "cancelled": summary.cancelled,
            });
            ctx.progress.complete(&summary.message(), Some(payload)).await
        }
    };
    if let Err(e) = reported {
        ctx.logger.side_effect_failed("task completion", &e).await;
    }

    if !summary.failed && !summary.results.is_empty() {
        spawn_hooks(ctx, collab, side_effects, &summary);
    }

    summary
}

/// Re-read the tested targets and fire the downstream triggers, un-awaited
fn spawn_hooks(ctx: &Arc<PhaseContext>, collab: &Collaborators, side_effects: &TaskTracker, summary: &RunSummary) {
    let ids: Vec<u64> = summary.results.iter().map(|r| r.target_id).collect();
    let catalog = Arc::clone(&collab.catalog);
    let hooks = Arc::clone(&collab.hooks);
    let fallback = tested_targets(&ctx.targets, &summary.results);
    let logger = ctx.logger.clone();
    let tracker = side_effects.clone();

    side_effects.spawn(async move {
        let targets = match catalog.list_targets(Some(&ids)).await {
            Ok(fresh) => fresh,
            Err(e) => {
                logger.side_effect_failed("target refresh", &e).await;
                fallback
            }
        };
        let sources: Vec<String> = targets
            .iter()
            .map(|t| t.source.clone())
            .filter(|s| !s.is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        let tag_hooks = Arc::clone(&hooks);
        let tag_logger = logger.clone();
        tracker.spawn(async move {
            if let Err(e) = tag_hooks.apply_tag_rules(&targets).await {
                tag_logger.side_effect_failed("tag rules", &e).await;
            }
        });
        if !sources.is_empty() {
            tracker.spawn(async move {
                if let Err(e) = hooks.refresh_usage(&sources).await {
                    logger.side_effect_failed("usage refresh", &e).await;
                }
            });
        }
    });
}

/// Run targets that ended up with a row, in run order
fn tested_targets(targets: &[Target], rows: &[SpeedTestResult]) -> Vec<Target> {
    let tested: HashSet<u64> = rows.iter().map(|r| r.target_id).collect();
    targets.iter().filter(|t| tested.contains(&t.id)).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeResult;

    #[test]
    fn test_tested_targets_keeps_run_order() {
        let targets: Vec<Target> = (1..=2000).map(|id| Target::new(id, format!("n{}", id), "direct://")).collect();
        let rows: Vec<SpeedTestResult> = [1500u64, 3, 42, 9999]
            .iter()
            .map(|id| SpeedTestResult::latency_only(*id, &NodeResult::success(10)))
            .collect();

        let ids: Vec<u64> = tested_targets(&targets, &rows).iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![3, 42, 1500]);
        assert!(tested_targets(&targets, &[]).is_empty());
    }
}
