//! Byte accounting for a run

use crate::models::Target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tokio::sync::Mutex;

/// Which breakdowns a run keeps besides the total
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficOptions {
    pub by_group: bool,
    pub by_source: bool,
    pub by_target: bool,
}

/// Totals read once at run completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrafficSnapshot {
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_group: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_source: BTreeMap<String, u64>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub by_target: BTreeMap<u64, u64>,
}

impl TrafficSnapshot {
    pub fn formatted_total(&self) -> String {
        format_bytes(self.total_bytes)
    }
}

/// Thread-safe byte counters behind one mutex
#[derive(Debug, Default)]
pub struct TrafficAccumulator {
    options: TrafficOptions,
    inner: Mutex<TrafficSnapshot>,
}

impl TrafficAccumulator {
    pub fn new(options: TrafficOptions) -> Self {
        Self {
            options,
            inner: Mutex::new(TrafficSnapshot::default()),
        }
    }

    /// Attribute transferred bytes to a target
    pub async fn add(&self, target: &Target, bytes: u64) {
        if bytes == 0 {
            return;
        }
        let mut inner = self.inner.lock().await;
        inner.total_bytes = inner.total_bytes.saturating_add(bytes);
        if self.options.by_group {
            bump(inner.by_group.entry(group_key(&target.group)).or_default(), bytes);
        }
        if self.options.by_source {
            bump(inner.by_source.entry(group_key(&target.source)).or_default(), bytes);
        }
        if self.options.by_target {
            bump(inner.by_target.entry(target.id).or_default(), bytes);
        }
    }

    pub async fn total_bytes(&self) -> u64 {
        self.inner.lock().await.total_bytes
    }

    pub async fn snapshot(&self) -> TrafficSnapshot {
        self.inner.lock().await.clone()
    }
}

/// Saturates like the total so every breakdown still sums to it
fn bump(counter: &mut u64, bytes: u64) {
    *counter = counter.saturating_add(bytes);
}

fn group_key(value: &str) -> String {
    if value.is_empty() {
        "(none)".to_string()
    } else {
        value.to_string()
    }
}

/// Render a byte count with two decimals and a binary unit
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes < 1024 {
        return format!("{} B", bytes);
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.2} {}", value, UNITS[unit])
}
