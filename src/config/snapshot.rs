//! Per-run settings snapshot
//!
//! A [`RunConfig`] is built once from a stored profile at the start of a run and
//! is never mutated afterwards. Concurrent runs each hold their own snapshot.

use crate::{
    defaults,
    error::{AppError, Result},
    executor::{AdmissionConfig, PhaseKind, TrafficOptions},
    models::SpeedTestProfile,
    types::{SpeedRecordMode, TestMode},
};
use serde::Serialize;
use std::time::Duration;

/// Immutable settings for one run, with every default applied
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub profile_id: u64,
    pub profile_name: String,
    pub mode: TestMode,
    pub latency_url: String,
    pub speed_url: String,
    /// Per-probe timeout
    pub timeout: Duration,
    pub detect_country: bool,
    pub landing_ip_url: String,
    pub traffic: TrafficOptions,
    pub include_handshake: bool,
    pub speed_record_mode: SpeedRecordMode,
    pub peak_sample_interval: Duration,
    pub persist_host: bool,
    /// Byte cap for a single throughput probe
    pub max_bytes: u64,
    pub latency_admission: AdmissionConfig,
    pub throughput_admission: AdmissionConfig,
}

fn or_default(value: &str, default: &str) -> String {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        default.to_string()
    } else {
        trimmed.to_string()
    }
}

impl RunConfig {
    /// Snapshot a profile. Zero and empty values fall back to the defaults.
    pub fn from_profile(profile: &SpeedTestProfile) -> Self {
        let timeout = if profile.timeout_seconds == 0 {
            defaults::DEFAULT_TIMEOUT
        } else {
            Duration::from_secs(profile.timeout_seconds)
        };
        let peak_sample_interval = if profile.peak_sample_interval_ms == 0 {
            defaults::DEFAULT_PEAK_SAMPLE_INTERVAL
        } else {
            Duration::from_millis(profile.peak_sample_interval_ms)
        };

        Self {
            profile_id: profile.id,
            profile_name: profile.name.clone(),
            mode: profile.mode,
            latency_url: or_default(&profile.latency_url, defaults::DEFAULT_LATENCY_URL),
            speed_url: or_default(&profile.speed_url, defaults::DEFAULT_SPEED_TEST_URL),
            timeout,
            detect_country: profile.detect_country,
            landing_ip_url: or_default(&profile.landing_ip_url, defaults::DEFAULT_LANDING_IP_URL),
            traffic: TrafficOptions {
                by_group: profile.traffic_by_group,
                by_source: profile.traffic_by_source,
                by_target: profile.traffic_by_target,
            },
            include_handshake: profile.include_handshake,
            speed_record_mode: profile.speed_record_mode,
            peak_sample_interval,
            persist_host: profile.persist_host,
            max_bytes: defaults::DEFAULT_MAX_BYTES,
            latency_admission: AdmissionConfig::from_concurrency(PhaseKind::Latency, profile.latency_concurrency),
            throughput_admission: AdmissionConfig::from_concurrency(
                PhaseKind::Throughput,
                profile.speed_concurrency,
            ),
        }
    }

    pub fn admission(&self, kind: PhaseKind) -> &AdmissionConfig {
        match kind {
            PhaseKind::Latency => &self.latency_admission,
            PhaseKind::Throughput => &self.throughput_admission,
        }
    }

    /// Landing IP URL to pass to probes, only when country detection is on
    pub fn landing_ip_request(&self) -> Option<String> {
        self.detect_country.then(|| self.landing_ip_url.clone())
    }

    /// Progress units for `targets` targets before survivors are known
    pub fn progress_total(&self, targets: usize) -> usize {
        if self.mode.has_throughput_phase() {
            targets * 2
        } else {
            targets
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    pub fn with_admission(mut self, config: AdmissionConfig) -> Self {
        match config.kind {
            PhaseKind::Latency => self.latency_admission = config,
            PhaseKind::Throughput => self.throughput_admission = config,
        }
        self
    }
}

/// Command line or environment overrides for a stored profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProfileOverrides {
    pub mode: Option<TestMode>,
    pub timeout_seconds: Option<u64>,
    pub latency_concurrency: Option<usize>,
    pub speed_concurrency: Option<usize>,
}

impl ProfileOverrides {
    /// Read `TEST_MODE`, `TIMEOUT_SECONDS`, `LATENCY_CONCURRENCY` and `SPEED_CONCURRENCY`
    pub fn from_env() -> Result<Self> {
        let mut overrides = Self::default();

        if let Some(mode) = env_value("TEST_MODE") {
            overrides.mode = Some(mode.parse()?);
        }
        if let Some(timeout) = env_value("TIMEOUT_SECONDS") {
            overrides.timeout_seconds = Some(
                timeout
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid TIMEOUT_SECONDS value '{}': {}", timeout, e)))?,
            );
        }
        if let Some(value) = env_value("LATENCY_CONCURRENCY") {
            overrides.latency_concurrency = Some(
                value
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid LATENCY_CONCURRENCY value '{}': {}", value, e)))?,
            );
        }
        if let Some(value) = env_value("SPEED_CONCURRENCY") {
            overrides.speed_concurrency = Some(
                value
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid SPEED_CONCURRENCY value '{}': {}", value, e)))?,
            );
        }

        Ok(overrides)
    }

    /// Values set in `other` win
    pub fn merge(self, other: ProfileOverrides) -> Self {
        Self {
            mode: other.mode.or(self.mode),
            timeout_seconds: other.timeout_seconds.or(self.timeout_seconds),
            latency_concurrency: other.latency_concurrency.or(self.latency_concurrency),
            speed_concurrency: other.speed_concurrency.or(self.speed_concurrency),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Apply to a profile and re-validate it
    pub fn apply(&self, profile: &mut SpeedTestProfile) -> Result<()> {
        if let Some(mode) = self.mode {
            profile.mode = mode;
        }
        if let Some(timeout) = self.timeout_seconds {
            profile.timeout_seconds = timeout;
        }
        if let Some(concurrency) = self.latency_concurrency {
            profile.latency_concurrency = concurrency;
        }
        if let Some(concurrency) = self.speed_concurrency {
            profile.speed_concurrency = concurrency;
        }
        profile.validate()
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_fill_unset_fields() {
        let run = RunConfig::from_profile(&SpeedTestProfile::new(1, "default"));

        assert_eq!(run.timeout, Duration::from_secs(5));
        assert_eq!(run.landing_ip_url, "https://api.ipify.org");
        assert_eq!(run.speed_record_mode, SpeedRecordMode::Average);
        assert_eq!(run.peak_sample_interval, Duration::from_millis(100));
        assert_eq!(run.latency_url, defaults::DEFAULT_LATENCY_URL);
        assert_eq!(run.speed_url, defaults::DEFAULT_SPEED_TEST_URL);
        assert_eq!(run.max_bytes, 20 * 1024 * 1024);
        assert!(!run.latency_admission.is_fixed());
        assert!(!run.throughput_admission.is_fixed());
        assert_eq!(run.landing_ip_request(), None);
    }

    #[test]
    fn test_profile_values_are_kept() {
        let mut profile = SpeedTestProfile::new(2, "custom");
        profile.mode = TestMode::Tcp;
        profile.timeout_seconds = 12;
        profile.latency_concurrency = 7;
        profile.detect_country = true;
        profile.landing_ip_url = "https://ip.example.com".into();
        profile.peak_sample_interval_ms = 250;
        profile.traffic_by_group = true;

        let run = RunConfig::from_profile(&profile);
        assert_eq!(run.timeout, Duration::from_secs(12));
        assert_eq!(run.latency_admission.fixed, Some(7));
        assert_eq!(run.peak_sample_interval, Duration::from_millis(250));
        assert_eq!(run.landing_ip_request().as_deref(), Some("https://ip.example.com"));
        assert!(run.traffic.by_group);
        assert_eq!(run.progress_total(10), 10);
    }

    #[test]
    fn test_full_mode_progress_spans_two_phases() {
        let run = RunConfig::from_profile(&SpeedTestProfile::new(3, "full"));
        assert_eq!(run.progress_total(10), 20);
    }

    #[test]
    fn test_overrides_merge_and_apply() {
        let env = ProfileOverrides {
            mode: Some(TestMode::Tcp),
            timeout_seconds: Some(9),
            ..Default::default()
        };
        let cli = ProfileOverrides {
            timeout_seconds: Some(3),
            speed_concurrency: Some(2),
            ..Default::default()
        };
        let merged = env.merge(cli);
        assert_eq!(merged.mode, Some(TestMode::Tcp));
        assert_eq!(merged.timeout_seconds, Some(3));

        let mut profile = SpeedTestProfile::new(4, "p");
        merged.apply(&mut profile).unwrap();
        assert_eq!(profile.mode, TestMode::Tcp);
        assert_eq!(profile.timeout_seconds, 3);
        assert_eq!(profile.speed_concurrency, 2);

        let too_long = ProfileOverrides {
            timeout_seconds: Some(301),
            ..Default::default()
        };
        assert!(too_long.apply(&mut profile).is_err());
        assert!(ProfileOverrides::default().is_empty());
    }
}
