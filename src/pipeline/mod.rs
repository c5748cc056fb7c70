//! Run orchestration
//!
//! [`SpeedTestPipeline`] turns a profile and a target list into a run: it
//! snapshots the profile, registers a task, runs the latency phase and, in full
//! mode, the throughput phase, then hands everything to a single completion
//! routine that persists rows and reports the outcome. Runs execute on their
//! own tokio task and are observed through a [`RunHandle`].

mod completion;
pub mod hooks;

pub use hooks::{NoopHooks, PostRunHooks};

use crate::{
    catalog::{ProfileStore, TargetCatalog},
    config::RunConfig,
    error::{AppError, Result},
    executor::{run_latency_phase, run_throughput_phase, PhaseContext, PhaseReport, TrafficSnapshot},
    geo::GeoResolver,
    hosts::HostResolver,
    logging::{Logger, RunLogger},
    measure::Measurer,
    models::{SpeedTestProfile, SpeedTestResult, Target},
    task::{ProgressSink, TaskBridge, TaskTrigger, SPEEDTEST_TASK_KIND},
    types::TestMode,
};
use chrono::{DateTime, Utc};
use completion::{finish_run, RunEnd};
use futures::FutureExt;
use serde::Serialize;
use std::{any::Any, panic::AssertUnwindSafe, sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use uuid::Uuid;

/// External services a pipeline talks to
#[derive(Clone)]
pub struct Collaborators {
    pub measurer: Arc<dyn Measurer>,
    pub catalog: Arc<dyn TargetCatalog>,
    pub profiles: Arc<dyn ProfileStore>,
    pub tasks: Arc<dyn TaskBridge>,
    pub geo: Option<Arc<dyn GeoResolver>>,
    pub hosts: Option<Arc<dyn HostResolver>>,
    pub hooks: Arc<dyn PostRunHooks>,
}

impl Collaborators {
    pub fn new(
        measurer: Arc<dyn Measurer>,
        catalog: Arc<dyn TargetCatalog>,
        profiles: Arc<dyn ProfileStore>,
        tasks: Arc<dyn TaskBridge>,
    ) -> Self {
        Self {
            measurer,
            catalog,
            profiles,
            tasks,
            geo: None,
            hosts: None,
            hooks: Arc::new(NoopHooks),
        }
    }

    pub fn with_geo(mut self, geo: Arc<dyn GeoResolver>) -> Self {
        self.geo = Some(geo);
        self
    }

    pub fn with_hosts(mut self, hosts: Arc<dyn HostResolver>) -> Self {
        self.hosts = Some(hosts);
        self
    }

    pub fn with_hooks(mut self, hooks: Arc<dyn PostRunHooks>) -> Self {
        self.hooks = hooks;
        self
    }
}

/// Outcome of one run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    /// `None` for runs that could not be registered as a task
    pub task_id: Option<String>,
    pub correlation_id: String,
    pub profile_id: u64,
    pub mode: TestMode,
    pub total: usize,
    pub success: usize,
    pub fail: usize,
    pub cancelled: bool,
    /// The run body faulted; rows written before the fault were still persisted
    pub failed: bool,
    pub error: Option<String>,
    /// The batch result write succeeded
    pub persisted: bool,
    pub traffic: TrafficSnapshot,
    pub phases: Vec<PhaseReport>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub results: Vec<SpeedTestResult>,
}

impl RunSummary {
    pub fn status_label(&self) -> &'static str {
        if self.failed {
            "failed"
        } else if self.cancelled {
            "cancelled"
        } else {
            "completed"
        }
    }

    /// Human completion message with counts and traffic
    pub fn message(&self) -> String {
        format!(
            "Speed test {}: {} success, {} failed, {} total, traffic {}",
            self.status_label(),
            self.success,
            self.fail,
            self.total,
            self.traffic.formatted_total()
        )
    }
}

/// A run in progress
pub struct RunHandle {
    pub task_id: Option<String>,
    pub correlation_id: String,
    cancel: CancellationToken,
    join: JoinHandle<RunSummary>,
}

impl RunHandle {
    /// Request cooperative cancellation. Probes already admitted finish.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the run to finish
    pub async fn wait(self) -> Result<RunSummary> {
        self.join
            .await
            .map_err(|e| AppError::internal(format!("Speed test task did not finish: {}", e)))
    }
}

/// Entry point for speed test runs
pub struct SpeedTestPipeline {
    collab: Collaborators,
    logger: Logger,
    /// Host upserts and post-run hooks still in flight
    side_effects: TaskTracker,
}

impl SpeedTestPipeline {
    pub fn new(collab: Collaborators, logger: Logger) -> Self {
        Self {
            collab,
            logger,
            side_effects: TaskTracker::new(),
        }
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.collab
    }

    /// Side-effect tasks of finished runs that have not completed yet
    pub fn pending_side_effects(&self) -> usize {
        self.side_effects.len()
    }

    /// Wait up to `limit` for host upserts and hooks of finished runs.
    ///
    /// Returns `false` if some were still running when the limit expired. The
    /// pipeline stays usable afterwards.
    pub async fn drain_side_effects(&self, limit: Duration) -> bool {
        self.side_effects.close();
        let drained = tokio::time::timeout(limit, self.side_effects.wait()).await.is_ok();
        self.side_effects.reopen();
        if !drained {
            self.logger
                .warn("Post-run side effects still running at shutdown")
                .field("pending", self.side_effects.len())
                .log()
                .await;
        }
        drained
    }

    /// Start a stored profile against all targets or a subset
    pub async fn start(&self, profile_id: u64, target_ids: Option<Vec<u64>>, trigger: TaskTrigger) -> Result<RunHandle> {
        let profile = self.collab.profiles.get_profile(profile_id).await?;
        self.start_with_profile(profile, target_ids, trigger).await
    }

    /// Start a profile that was loaded, and possibly overridden, by the caller
    pub async fn start_with_profile(
        &self,
        profile: SpeedTestProfile,
        target_ids: Option<Vec<u64>>,
        trigger: TaskTrigger,
    ) -> Result<RunHandle> {
        profile.validate()?;
        let targets = self.collab.catalog.list_targets(target_ids.as_deref()).await?;
        Ok(self.launch(&profile, targets, trigger).await)
    }

    /// Run a stored profile and wait for its summary
    pub async fn run_profile(&self, profile_id: u64, target_ids: Option<Vec<u64>>, trigger: TaskTrigger) -> Result<RunSummary> {
        self.start(profile_id, target_ids, trigger).await?.wait().await
    }

    async fn launch(&self, profile: &SpeedTestProfile, targets: Vec<Target>, trigger: TaskTrigger) -> RunHandle {
        let run = Arc::new(RunConfig::from_profile(profile));
        let name = if profile.name.is_empty() {
            format!("Speed test #{}", profile.id)
        } else {
            format!("Speed test: {}", profile.name)
        };

        let (progress, cancel) = match self
            .collab
            .tasks
            .create_task(SPEEDTEST_TASK_KIND, &name, trigger, run.progress_total(targets.len()))
            .await
        {
            Ok((record, token)) => (ProgressSink::tracked(Arc::clone(&self.collab.tasks), record.id), token),
            Err(e) => {
                self.logger
                    .warn(&format!("Task tracking unavailable, running untracked: {}", e))
                    .error_info(&e)
                    .field("profile_id", profile.id)
                    .log()
                    .await;
                (ProgressSink::untracked(), CancellationToken::new())
            }
        };

        let correlation_id = progress
            .task_id()
            .map(String::from)
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let logger = RunLogger::new(self.logger.named("RUN"), correlation_id.clone());

        let ctx = Arc::new(
            PhaseContext::new(run, Arc::new(targets), Arc::clone(&self.collab.measurer))
                .with_geo(self.collab.geo.clone())
                .with_hosts(self.collab.hosts.clone())
                .with_progress(progress.clone())
                .with_cancel(cancel.clone())
                .with_logger(logger),
        );

        let driver = RunDriver {
            ctx,
            collab: self.collab.clone(),
            side_effects: self.side_effects.clone(),
        };
        let join = tokio::spawn(driver.drive());

        RunHandle {
            task_id: progress.task_id().map(String::from),
            correlation_id,
            cancel,
            join,
        }
    }
}

struct RunDriver {
    ctx: Arc<PhaseContext>,
    collab: Collaborators,
    side_effects: TaskTracker,
}

impl RunDriver {
    async fn drive(self) -> RunSummary {
        let started_at = Utc::now();
        let guard = RunGuard::new(self.ctx.progress.clone());
        self.ctx
            .logger
            .run_started(
                self.ctx.run.profile_id,
                self.ctx.run.mode.as_str(),
                self.ctx.targets.len(),
                self.ctx.progress.is_tracked(),
            )
            .await;

        let mut phases = Vec::new();
        let body = AssertUnwindSafe(Self::execute(&self.ctx, &mut phases)).catch_unwind().await;
        let end = match body {
            Ok(()) => RunEnd::Finished,
            Err(payload) => RunEnd::Faulted(panic_message(payload.as_ref())),
        };

        let summary = finish_run(&self.ctx, &self.collab, &self.side_effects, started_at, phases, end).await;
        guard.disarm();

        let logger = &self.ctx.logger;
        logger
            .entry(crate::logging::LogLevel::Info, &summary.message())
            .field("success", summary.success)
            .field("fail", summary.fail)
            .field("total", summary.total)
            .field("status", summary.status_label())
            .field("elapsed_ms", summary.elapsed_ms)
            .log()
            .await;
        summary
    }

    async fn execute(ctx: &Arc<PhaseContext>, phases: &mut Vec<PhaseReport>) {
        phases.push(run_latency_phase(ctx).await);
        if ctx.run.mode.has_throughput_phase() && !ctx.cancel.is_cancelled() {
            phases.push(run_throughput_phase(ctx).await);
        }
    }
}

/// Fails the task if the driver is dropped before completion ran
struct RunGuard {
    progress: Option<ProgressSink>,
}

impl RunGuard {
    fn new(progress: ProgressSink) -> Self {
        Self {
            progress: Some(progress),
        }
    }

    fn disarm(mut self) {
        self.progress = None;
    }
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        let Some(progress) = self.progress.take() else {
            return;
        };
        if !progress.is_tracked() {
            return;
        }
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = progress.fail("Speed test aborted before completion").await;
            });
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
