//! Deterministic measurer for tests, benches and dry runs

use super::{LatencyProbe, LatencyRequest, Measurer, ThroughputProbe, ThroughputRequest};
use crate::error::{AppError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Answers probes from a fixed script instead of the network.
///
/// Tracks how many probes run at once so callers can check admission bounds.
#[derive(Debug, Default)]
pub struct ScriptedMeasurer {
    latency_ms: i64,
    speed_mbps: f64,
    bytes_per_target: u64,
    landing_ip: Option<String>,
    delay: Duration,
    failing_latency: HashSet<u64>,
    failing_throughput: HashSet<u64>,
    panic_on: Option<u64>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
    latency_calls: AtomicUsize,
    throughput_calls: AtomicUsize,
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedMeasurer {
    pub fn new() -> Self {
        Self {
            latency_ms: 50,
            speed_mbps: 5.0,
            bytes_per_target: 5 * 1024 * 1024,
            ..Default::default()
        }
    }

    pub fn with_latency_ms(mut self, latency_ms: i64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_speed_mbps(mut self, speed_mbps: f64) -> Self {
        self.speed_mbps = speed_mbps;
        self
    }

    pub fn with_bytes_per_target(mut self, bytes: u64) -> Self {
        self.bytes_per_target = bytes;
        self
    }

    pub fn with_landing_ip(mut self, ip: impl Into<String>) -> Self {
        self.landing_ip = Some(ip.into());
        self
    }

    /// Simulated duration of every probe
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Targets whose latency probe fails
    pub fn failing_latency(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.failing_latency.extend(ids);
        self
    }

    /// Targets whose throughput probe fails
    pub fn failing_throughput(mut self, ids: impl IntoIterator<Item = u64>) -> Self {
        self.failing_throughput.extend(ids);
        self
    }

    /// Panic inside the latency probe of this target
    pub fn panic_on(mut self, id: u64) -> Self {
        self.panic_on = Some(id);
        self
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub fn latency_calls(&self) -> usize {
        self.latency_calls.load(Ordering::SeqCst)
    }

    pub fn throughput_calls(&self) -> usize {
        self.throughput_calls.load(Ordering::SeqCst)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }

    async fn simulate(&self) {
        if self.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.delay).await;
        }
    }
}

#[async_trait]
impl Measurer for ScriptedMeasurer {
    async fn measure_latency(&self, request: &LatencyRequest) -> Result<LatencyProbe> {
        let _guard = self.enter();
        self.latency_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await;

        let id = request.target.id;
        if self.panic_on == Some(id) {
            panic!("scripted panic for target {}", id);
        }
        if self.failing_latency.contains(&id) {
            return Err(AppError::timeout(format!("target {} did not answer", id)));
        }

        Ok(LatencyProbe {
            latency_ms: self.latency_ms,
            landing_ip: request.landing_ip_url.as_ref().and(self.landing_ip.clone()),
        })
    }

    async fn measure_throughput(&self, request: &ThroughputRequest) -> Result<ThroughputProbe> {
        let _guard = self.enter();
        self.throughput_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate().await;

        let id = request.target.id;
        if self.failing_throughput.contains(&id) {
            return Err(AppError::measurement(format!("transfer through target {} reset", id)));
        }

        Ok(ThroughputProbe {
            speed_mbps: self.speed_mbps,
            latency_ms: self.latency_ms,
            bytes_transferred: self.bytes_per_target.min(request.max_bytes),
            landing_ip: request.landing_ip_url.as_ref().and(self.landing_ip.clone()),
        })
    }
}
