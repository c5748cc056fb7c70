//! Measurement collaborator
//!
//! A [`Measurer`] performs exactly one probe per call and reports the outcome;
//! it never retries and never touches run state. The phase runner owns timeouts,
//! admission and bookkeeping.

pub mod http;
pub mod link;
pub mod scripted;

use crate::error::Result;
use crate::models::Target;
use crate::types::SpeedRecordMode;
use async_trait::async_trait;
use std::time::Duration;

pub use http::HttpMeasurer;
pub use link::{ProxyLink, ProxyScheme};
pub use scripted::ScriptedMeasurer;

/// One latency probe
#[derive(Debug, Clone)]
pub struct LatencyRequest {
    pub target: Target,
    pub url: String,
    pub timeout: Duration,
    /// Count the proxy connection setup in the measured latency
    pub include_handshake: bool,
    /// When set, also report the exit IP seen by this URL
    pub landing_ip_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LatencyProbe {
    pub latency_ms: i64,
    pub landing_ip: Option<String>,
}

/// One throughput probe
#[derive(Debug, Clone)]
pub struct ThroughputRequest {
    pub target: Target,
    pub url: String,
    /// Transfer window; reaching it ends the probe without failing it
    pub timeout: Duration,
    /// Stop once this many bytes have been read
    pub max_bytes: u64,
    pub record_mode: SpeedRecordMode,
    pub peak_sample_interval: Duration,
    pub landing_ip_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThroughputProbe {
    /// MB/s
    pub speed_mbps: f64,
    /// Time to first response, in milliseconds
    pub latency_ms: i64,
    pub bytes_transferred: u64,
    pub landing_ip: Option<String>,
}

/// Network measurement primitives used by the pipeline
#[async_trait]
pub trait Measurer: Send + Sync {
    async fn measure_latency(&self, request: &LatencyRequest) -> Result<LatencyProbe>;

    async fn measure_throughput(&self, request: &ThroughputRequest) -> Result<ThroughputProbe>;
}

/// MB/s for a byte count over a duration
pub fn megabytes_per_second(bytes: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs <= f64::EPSILON {
        return 0.0;
    }
    bytes as f64 / (1024.0 * 1024.0) / secs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_megabytes_per_second() {
        assert_eq!(megabytes_per_second(1024 * 1024, Duration::from_secs(1)), 1.0);
        assert_eq!(megabytes_per_second(10 * 1024 * 1024, Duration::from_secs(2)), 5.0);
        assert_eq!(megabytes_per_second(100, Duration::ZERO), 0.0);
    }
}
