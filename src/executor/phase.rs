//! Phase runner
//!
//! Both phases follow the same loop: check the cancellation token, wait for an
//! admission permit, spawn the probe into a `JoinSet`, and feed each outcome
//! back to the controller. Probes write their results into the shared
//! [`ResultSink`]; nothing is returned through the join handles.

use super::admission::{AdmissionController, AdmissionSnapshot, PhaseKind};
use super::sink::ResultSink;
use super::traffic::TrafficAccumulator;
use crate::{
    config::RunConfig,
    error::AppError,
    geo::GeoResolver,
    hosts::{host_mapping_for, HostResolver},
    logging::{LogLevel, Logger, RunLogger},
    measure::{http::LANDING_IP_BUDGET, LatencyRequest, Measurer, ThroughputRequest},
    models::{NodeResult, SpeedTestResult, Target},
    task::ProgressSink,
    types::{LatencyStatus, SpeedStatus},
};
use chrono::Utc;
use serde::Serialize;
use std::{
    any::Any,
    future::Future,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Slack on top of the probe timeout before the runner gives up on a measurer;
/// must exceed [`LANDING_IP_BUDGET`]
const PROBE_GRACE: Duration = Duration::from_secs(LANDING_IP_BUDGET.as_secs() + 1);

/// Everything a probe needs, shared by all probes of a run
pub struct PhaseContext {
    pub run: Arc<RunConfig>,
    pub targets: Arc<Vec<Target>>,
    pub measurer: Arc<dyn Measurer>,
    pub geo: Option<Arc<dyn GeoResolver>>,
    pub hosts: Option<Arc<dyn HostResolver>>,
    pub progress: ProgressSink,
    pub cancel: CancellationToken,
    pub logger: RunLogger,
    pub sink: Arc<ResultSink>,
    pub traffic: Arc<TrafficAccumulator>,
}

impl PhaseContext {
    /// Untracked, uncancelled context with fresh buffers
    pub fn new(run: Arc<RunConfig>, targets: Arc<Vec<Target>>, measurer: Arc<dyn Measurer>) -> Self {
        let sink = Arc::new(ResultSink::new(targets.len()));
        let traffic = Arc::new(TrafficAccumulator::new(run.traffic));
        Self {
            run,
            targets,
            measurer,
            geo: None,
            hosts: None,
            progress: ProgressSink::untracked(),
            cancel: CancellationToken::new(),
            logger: RunLogger::new(Logger::quiet("RUN"), "untracked"),
            sink,
            traffic,
        }
    }

    pub fn with_geo(mut self, geo: Option<Arc<dyn GeoResolver>>) -> Self {
        self.geo = geo;
        self
    }

    pub fn with_hosts(mut self, hosts: Option<Arc<dyn HostResolver>>) -> Self {
        self.hosts = hosts;
        self
    }

    pub fn with_progress(mut self, progress: ProgressSink) -> Self {
        self.progress = progress;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_logger(mut self, logger: RunLogger) -> Self {
        self.logger = logger;
        self
    }

    fn target(&self, index: usize) -> Option<&Target> {
        self.targets.get(index)
    }

    /// Country for a landing IP; lookup failures are logged and dropped
    async fn detect_country(&self, target: &Target, landing_ip: Option<&str>) -> Option<String> {
        if !self.run.detect_country {
            return None;
        }
        let geo = self.geo.as_ref()?;
        let ip = landing_ip?;
        match geo.country_code(ip).await {
            Ok(code) => Some(code),
            Err(e) => {
                self.logger
                    .entry(LogLevel::Debug, &format!("Country lookup failed for {}: {}", ip, e))
                    .target(target)
                    .error_info(&e)
                    .log()
                    .await;
                None
            }
        }
    }
}

/// What one phase did
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub kind: PhaseKind,
    /// Targets the phase was asked to probe
    pub scheduled: usize,
    /// Probes that were admitted
    pub started: usize,
    pub completed: usize,
    pub succeeded: usize,
    /// Stopped before every scheduled probe was admitted
    pub cancelled: bool,
    pub elapsed_ms: u64,
    pub admission: AdmissionSnapshot,
}

impl PhaseReport {
    pub fn failed(&self) -> usize {
        self.completed - self.succeeded
    }
}

/// Outcome fed back to the admission controller
struct ProbeOutcome {
    metric: Option<f64>,
}

impl ProbeOutcome {
    fn success(metric: f64) -> Self {
        Self { metric: Some(metric) }
    }

    fn failure() -> Self {
        Self { metric: None }
    }
}

/// Latency phase over every target.
///
/// Records a [`NodeResult`] per probed target. Latency failures get their final
/// row here; in tcp mode successes do too.
///
/// # Panics
///
/// Re-raises a panic from any probe once the remaining probes have drained.
pub async fn run_latency_phase(ctx: &Arc<PhaseContext>) -> PhaseReport {
    let total = ctx.targets.len();
    let controller = AdmissionController::new(ctx.run.latency_admission.clone(), total);
    drive(ctx, controller, (0..total).collect(), 0, probe_latency).await
}

/// Throughput phase over the latency survivors.
///
/// Progress continues after the latency range; the task total is narrowed to
/// the number of probes that can still happen.
///
/// # Panics
///
/// Re-raises a panic from any probe once the remaining probes have drained.
pub async fn run_throughput_phase(ctx: &Arc<PhaseContext>) -> PhaseReport {
    let total = ctx.targets.len();
    let survivors: Vec<usize> = ctx.sink.survivors().into_iter().map(|(index, _)| index).collect();

    if let Err(e) = ctx.progress.update_total(total + survivors.len()).await {
        ctx.logger.side_effect_failed("progress total update", &e).await;
    }

    let controller = AdmissionController::new(ctx.run.throughput_admission.clone(), survivors.len());
    drive(ctx, controller, survivors, total, probe_throughput).await
}

async fn drive<F, Fut>(
    ctx: &Arc<PhaseContext>,
    controller: Arc<AdmissionController>,
    work: Vec<usize>,
    progress_offset: usize,
    probe: F,
) -> PhaseReport
where
    F: Fn(Arc<PhaseContext>, usize) -> Fut,
    Fut: Future<Output = ProbeOutcome> + Send + 'static,
{
    let kind = controller.kind();
    let started_at = Instant::now();
    let scheduled = work.len();
    let completed = Arc::new(AtomicUsize::new(0));
    let succeeded = Arc::new(AtomicUsize::new(0));
    let mut panic: Option<Box<dyn Any + Send>> = None;
    let mut started = 0;
    let mut set = JoinSet::new();

    ctx.logger
        .phase_started(kind, scheduled, controller.current_concurrency(), controller.is_fixed())
        .await;

    for index in work {
        if ctx.cancel.is_cancelled() {
            break;
        }
        while let Some(joined) = set.try_join_next() {
            keep_panic(&mut panic, joined);
        }
        if panic.is_some() {
            break;
        }
        let Some(permit) = controller.acquire_with_delay(&ctx.cancel).await else {
            break;
        };
        started += 1;

        let probe_future = probe(Arc::clone(ctx), index);
        let ctx = Arc::clone(ctx);
        let controller = Arc::clone(&controller);
        let completed = Arc::clone(&completed);
        let succeeded = Arc::clone(&succeeded);

        set.spawn(async move {
            let outcome = probe_future.await;
            match outcome.metric {
                Some(metric) => {
                    controller.report_success(metric);
                    succeeded.fetch_add(1, Ordering::SeqCst);
                }
                None => controller.report_failure(),
            }

            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            if done % controller.config().adjust_every.max(1) == 0 {
                let adjustment = controller.maybe_adjust();
                ctx.logger.admission_adjusted(kind, adjustment).await;
            }

            let label = ctx.target(index).map(|t| t.label().to_string()).unwrap_or_default();
            let snapshot = serde_json::to_value(controller.snapshot()).ok();
            if let Err(e) = ctx.progress.advance(progress_offset + done, &label, snapshot).await {
                ctx.logger
                    .entry(LogLevel::Debug, &format!("Progress update failed: {}", e))
                    .error_info(&e)
                    .log()
                    .await;
            }

            // Held until progress is reported so a cancel issued from it stops the next grant
            drop(permit);
        });
    }

    while let Some(joined) = set.join_next().await {
        keep_panic(&mut panic, joined);
    }

    let elapsed = started_at.elapsed();
    let report = PhaseReport {
        kind,
        scheduled,
        started,
        completed: completed.load(Ordering::SeqCst),
        succeeded: succeeded.load(Ordering::SeqCst),
        cancelled: started < scheduled,
        elapsed_ms: elapsed.as_millis() as u64,
        admission: controller.snapshot(),
    };
    ctx.logger
        .phase_finished(kind, report.completed, elapsed, report.cancelled)
        .await;

    if let Some(payload) = panic {
        std::panic::resume_unwind(payload);
    }
    report
}

fn keep_panic(slot: &mut Option<Box<dyn Any + Send>>, joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() && slot.is_none() {
            *slot = Some(e.into_panic());
        }
    }
}

async fn probe_latency(ctx: Arc<PhaseContext>, index: usize) -> ProbeOutcome {
    let Some(target) = ctx.target(index) else {
        return ProbeOutcome::failure();
    };
    let latency_only = !ctx.run.mode.has_throughput_phase();
    let request = LatencyRequest {
        target: target.clone(),
        url: ctx.run.latency_url.clone(),
        timeout: ctx.run.timeout,
        include_handshake: ctx.run.include_handshake,
        // Without a throughput phase this is the only chance to see the exit IP
        landing_ip_url: if latency_only { ctx.run.landing_ip_request() } else { None },
    };

    let result = match tokio::time::timeout(ctx.run.timeout + PROBE_GRACE, ctx.measurer.measure_latency(&request)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(format!(
            "Latency probe for {} exceeded {:?}",
            target.label(),
            ctx.run.timeout
        ))),
    };

    match result {
        Ok(probe) => {
            let mut node = NodeResult::success(probe.latency_ms);
            if latency_only {
                node.country = ctx.detect_country(target, probe.landing_ip.as_deref()).await;
                node.landing_ip = probe.landing_ip;
                ctx.sink.put_row(index, SpeedTestResult::latency_only(target.id, &node));
            }
            ctx.sink.record_node(index, node);
            ProbeOutcome::success(probe.latency_ms as f64)
        }
        Err(e) => {
            ctx.logger.probe_failed(PhaseKind::Latency, target, &e).await;
            ctx.sink.record_node(index, NodeResult::failure());
            let row = SpeedTestResult::latency_failed(target.id, Some(e.to_string()));
            ctx.sink
                .put_row(index, if latency_only { row.without_speed() } else { row });
            ProbeOutcome::failure()
        }
    }
}

async fn probe_throughput(ctx: Arc<PhaseContext>, index: usize) -> ProbeOutcome {
    let Some(target) = ctx.target(index) else {
        return ProbeOutcome::failure();
    };
    let node = ctx.sink.node(index).unwrap_or_default();
    let request = ThroughputRequest {
        target: target.clone(),
        url: ctx.run.speed_url.clone(),
        timeout: ctx.run.timeout,
        max_bytes: ctx.run.max_bytes,
        record_mode: ctx.run.speed_record_mode,
        peak_sample_interval: ctx.run.peak_sample_interval,
        landing_ip_url: ctx.run.landing_ip_request(),
    };

    let result = match tokio::time::timeout(ctx.run.timeout + PROBE_GRACE, ctx.measurer.measure_throughput(&request)).await {
        Ok(result) => result,
        Err(_) => Err(AppError::timeout(format!(
            "Throughput probe for {} exceeded {:?}",
            target.label(),
            ctx.run.timeout
        ))),
    };

    match result {
        Ok(probe) => {
            ctx.traffic.add(target, probe.bytes_transferred).await;

            let landing_ip = probe.landing_ip.or_else(|| node.landing_ip.clone());
            let country_code = match node.country.clone() {
                Some(code) => Some(code),
                None => ctx.detect_country(target, landing_ip.as_deref()).await,
            };

            if ctx.run.persist_host {
                if let Some(mapping) = host_mapping_for(target, ctx.hosts.as_deref()).await {
                    ctx.sink.push_host(mapping);
                }
            }

            ctx.sink.put_row(
                index,
                SpeedTestResult {
                    target_id: target.id,
                    speed_mbps: probe.speed_mbps,
                    speed_status: SpeedStatus::Success,
                    latency_ms: node.latency_ms,
                    latency_status: LatencyStatus::Success,
                    tested_at: Utc::now(),
                    country_code,
                    landing_ip,
                    bytes_transferred: probe.bytes_transferred,
                    error: None,
                },
            );
            ProbeOutcome::success(probe.speed_mbps)
        }
        Err(e) => {
            ctx.logger.probe_failed(PhaseKind::Throughput, target, &e).await;
            ctx.sink
                .put_row(index, SpeedTestResult::throughput_failed(target.id, &node, Some(e.to_string())));
            ProbeOutcome::failure()
        }
    }
}
