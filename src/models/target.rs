//! Targets and per-target measurement results

use crate::types::{LatencyStatus, SpeedStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sentinel used for failed latency and speed values
pub const FAILED: i64 = -1;

/// A proxy endpoint to be measured
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    /// Dial descriptor, e.g. `socks5://10.0.0.1:1080`
    pub link: String,
    #[serde(default)]
    pub group: String,
    #[serde(default)]
    pub source: String,
}

impl Target {
    pub fn new(id: u64, name: impl Into<String>, link: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            link: link.into(),
            group: String::new(),
            source: String::new(),
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Name used in progress labels and logs
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            &self.link
        } else {
            &self.name
        }
    }
}

/// Latency phase outcome for one target
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeResult {
    /// Milliseconds, or [`FAILED`]
    pub latency_ms: i64,
    pub failed: bool,
    pub landing_ip: Option<String>,
    pub country: Option<String>,
}

impl NodeResult {
    pub fn success(latency_ms: i64) -> Self {
        Self {
            latency_ms,
            failed: false,
            landing_ip: None,
            country: None,
        }
    }

    pub fn failure() -> Self {
        Self {
            latency_ms: FAILED,
            failed: true,
            landing_ip: None,
            country: None,
        }
    }
}

/// Final per-target row written back to the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestResult {
    pub target_id: u64,
    /// MB/s; -1 on failure, 0 when no throughput probe ran
    pub speed_mbps: f64,
    pub speed_status: SpeedStatus,
    pub latency_ms: i64,
    pub latency_status: LatencyStatus,
    pub tested_at: DateTime<Utc>,
    #[serde(default)]
    pub country_code: Option<String>,
    #[serde(default)]
    pub landing_ip: Option<String>,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub error: Option<String>,
}

impl SpeedTestResult {
    /// Row for a target that failed the latency probe
    pub fn latency_failed(target_id: u64, error: Option<String>) -> Self {
        Self {
            target_id,
            speed_mbps: FAILED as f64,
            speed_status: SpeedStatus::Error,
            latency_ms: FAILED,
            latency_status: LatencyStatus::Timeout,
            tested_at: Utc::now(),
            country_code: None,
            landing_ip: None,
            bytes_transferred: 0,
            error,
        }
    }

    /// Row carrying only the latency phase outcome; speed is left untested
    pub fn latency_only(target_id: u64, node: &NodeResult) -> Self {
        Self {
            target_id,
            speed_mbps: 0.0,
            speed_status: SpeedStatus::Untested,
            latency_ms: node.latency_ms,
            latency_status: LatencyStatus::Success,
            tested_at: Utc::now(),
            country_code: node.country.clone(),
            landing_ip: node.landing_ip.clone(),
            bytes_transferred: 0,
            error: None,
        }
    }

    /// Row for a latency survivor whose throughput probe failed
    pub fn throughput_failed(target_id: u64, node: &NodeResult, error: Option<String>) -> Self {
        Self {
            speed_mbps: FAILED as f64,
            speed_status: SpeedStatus::Error,
            error,
            ..Self::latency_only(target_id, node)
        }
    }

    /// Clear the speed columns, for runs without a throughput phase
    pub fn without_speed(mut self) -> Self {
        self.speed_mbps = 0.0;
        self.speed_status = SpeedStatus::Untested;
        self
    }

    pub fn is_success(&self) -> bool {
        self.latency_status == LatencyStatus::Success && self.speed_status != SpeedStatus::Error
    }
}

/// Where a host mapping came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostSource {
    /// Recorded by a speed test run
    Speedtest,
    Manual,
}

/// Resolved hostname of a working target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostMapping {
    pub hostname: String,
    pub ip: String,
    #[serde(default)]
    pub description: String,
    pub source: HostSource,
}
