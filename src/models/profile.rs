//! Persisted speed test profile

use crate::types::{AppError, Result, SpeedRecordMode, TestMode};
use serde::{Deserialize, Serialize};

/// Upper bound accepted for a profile timeout
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// A stored speed test profile.
///
/// Zero values mean "unset" and are filled in when the run snapshot is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedTestProfile {
    pub id: u64,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub mode: TestMode,

    /// URL requested through the proxy for the latency probe
    #[serde(default)]
    pub latency_url: String,

    /// URL streamed through the proxy for the throughput probe
    #[serde(default)]
    pub speed_url: String,

    #[serde(default)]
    pub timeout_seconds: u64,

    /// 0 = adaptive
    #[serde(default)]
    pub latency_concurrency: usize,

    /// 0 = adaptive
    #[serde(default)]
    pub speed_concurrency: usize,

    #[serde(default)]
    pub detect_country: bool,

    #[serde(default)]
    pub landing_ip_url: String,

    #[serde(default)]
    pub traffic_by_group: bool,

    #[serde(default)]
    pub traffic_by_source: bool,

    #[serde(default)]
    pub traffic_by_target: bool,

    /// Measure latency including the proxy connection handshake
    #[serde(default)]
    pub include_handshake: bool,

    #[serde(default)]
    pub speed_record_mode: SpeedRecordMode,

    #[serde(default)]
    pub peak_sample_interval_ms: u64,

    /// Record resolved host mappings for targets that pass the throughput phase
    #[serde(default)]
    pub persist_host: bool,
}

impl SpeedTestProfile {
    /// Create a profile with every optional field unset
    pub fn new(id: u64, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            mode: TestMode::default(),
            latency_url: String::new(),
            speed_url: String::new(),
            timeout_seconds: 0,
            latency_concurrency: 0,
            speed_concurrency: 0,
            detect_country: false,
            landing_ip_url: String::new(),
            traffic_by_group: false,
            traffic_by_source: false,
            traffic_by_target: false,
            include_handshake: false,
            speed_record_mode: SpeedRecordMode::default(),
            peak_sample_interval_ms: 0,
            persist_host: false,
        }
    }

    /// Validate the profile and return the first problem found
    pub fn validate(&self) -> Result<()> {
        for (label, value) in [
            ("latency URL", &self.latency_url),
            ("speed URL", &self.speed_url),
            ("landing IP URL", &self.landing_ip_url),
        ] {
            if value.is_empty() {
                continue;
            }
            match url::Url::parse(value) {
                Ok(parsed) if parsed.scheme() == "http" || parsed.scheme() == "https" => {}
                Ok(parsed) => {
                    return Err(AppError::validation(format!(
                        "Profile {} {} must use http or https, got '{}'",
                        self.id,
                        label,
                        parsed.scheme()
                    )))
                }
                Err(e) => {
                    return Err(AppError::validation(format!(
                        "Profile {} has an invalid {} '{}': {}",
                        self.id, label, value, e
                    )))
                }
            }
        }

        if self.timeout_seconds > MAX_TIMEOUT_SECONDS {
            return Err(AppError::validation(format!(
                "Timeout cannot exceed {} seconds",
                MAX_TIMEOUT_SECONDS
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_profile_is_valid() {
        assert!(SpeedTestProfile::new(1, "default").validate().is_ok());
    }

    #[test]
    fn test_invalid_urls_rejected() {
        let mut profile = SpeedTestProfile::new(1, "bad");
        profile.speed_url = "not a url".to_string();
        assert!(profile.validate().is_err());

        let mut profile = SpeedTestProfile::new(1, "ftp");
        profile.latency_url = "ftp://example.com/file".to_string();
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_timeout_bound() {
        let mut profile = SpeedTestProfile::new(1, "slow");
        profile.timeout_seconds = MAX_TIMEOUT_SECONDS + 1;
        assert!(profile.validate().is_err());
    }

    #[test]
    fn test_sparse_json_uses_defaults() {
        let profile: SpeedTestProfile = serde_json::from_str(r#"{"id": 7, "mode": "tcp"}"#).unwrap();
        assert_eq!(profile.id, 7);
        assert_eq!(profile.mode, TestMode::Tcp);
        assert_eq!(profile.timeout_seconds, 0);
        assert_eq!(profile.speed_record_mode, SpeedRecordMode::Average);
    }
}
