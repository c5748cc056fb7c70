//! Type definitions and aliases

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use crate::error::{AppError, Result};

/// What a run measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestMode {
    /// Latency only; no throughput phase is run
    Tcp,
    /// Latency followed by throughput on the survivors
    #[default]
    Full,
}

impl TestMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TestMode::Tcp => "tcp",
            TestMode::Full => "full",
        }
    }

    /// Whether a throughput phase follows the latency phase
    pub fn has_throughput_phase(&self) -> bool {
        matches!(self, TestMode::Full)
    }
}

impl FromStr for TestMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tcp" | "latency" => Ok(TestMode::Tcp),
            "full" => Ok(TestMode::Full),
            other => Err(AppError::parse(format!("Invalid test mode: {}", other))),
        }
    }
}

impl fmt::Display for TestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How throughput samples are reduced to a single speed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedRecordMode {
    /// Total bytes over total elapsed time
    #[default]
    Average,
    /// Best windowed sample seen during the transfer
    Peak,
}

impl FromStr for SpeedRecordMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "average" | "avg" => Ok(SpeedRecordMode::Average),
            "peak" | "max" => Ok(SpeedRecordMode::Peak),
            other => Err(AppError::parse(format!("Invalid speed record mode: {}", other))),
        }
    }
}

/// Throughput outcome of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeedStatus {
    #[default]
    Untested,
    Success,
    Error,
}

/// Latency outcome of one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LatencyStatus {
    #[default]
    Untested,
    Success,
    Timeout,
}

impl fmt::Display for SpeedStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SpeedStatus::Untested => "untested",
            SpeedStatus::Success => "success",
            SpeedStatus::Error => "error",
        };
        f.write_str(s)
    }
}

impl fmt::Display for LatencyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LatencyStatus::Untested => "untested",
            LatencyStatus::Success => "success",
            LatencyStatus::Timeout => "timeout",
        };
        f.write_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("tcp".parse::<TestMode>().unwrap(), TestMode::Tcp);
        assert_eq!(" FULL ".parse::<TestMode>().unwrap(), TestMode::Full);
        assert!("udp".parse::<TestMode>().is_err());
        assert!(!TestMode::Tcp.has_throughput_phase());
    }

    #[test]
    fn test_status_serde_names() {
        assert_eq!(serde_json::to_string(&SpeedStatus::Untested).unwrap(), "\"untested\"");
        assert_eq!(serde_json::to_string(&LatencyStatus::Timeout).unwrap(), "\"timeout\"");
        let mode: SpeedRecordMode = serde_json::from_str("\"peak\"").unwrap();
        assert_eq!(mode, SpeedRecordMode::Peak);
    }
}
