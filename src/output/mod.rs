//! Terminal rendering of run summaries and profiles

use crate::{
    executor::format_bytes,
    models::{SpeedTestProfile, SpeedTestResult, Target},
    pipeline::RunSummary,
    types::{LatencyStatus, SpeedStatus},
};
use colored::*;
use std::collections::HashMap;
use std::fmt::Write as _;

/// Latency classification for color coding
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LatencyLevel {
    Excellent, // < 100ms
    Good,      // 100-300ms
    Fair,      // 300-800ms
    Poor,      // >= 800ms
}

impl LatencyLevel {
    pub fn from_millis(ms: i64) -> Self {
        match ms {
            i64::MIN..=99 => Self::Excellent,
            100..=299 => Self::Good,
            300..=799 => Self::Fair,
            _ => Self::Poor,
        }
    }

    pub fn color(&self) -> Color {
        match self {
            Self::Excellent => Color::Green,
            Self::Good => Color::Cyan,
            Self::Fair => Color::Yellow,
            Self::Poor => Color::Red,
        }
    }
}

/// Renders run results for the terminal
pub struct SummaryFormatter {
    use_color: bool,
    verbose: bool,
}

impl SummaryFormatter {
    pub fn new(use_color: bool, verbose: bool) -> Self {
        Self { use_color, verbose }
    }

    fn paint(&self, text: &str, color: Color) -> String {
        if self.use_color {
            text.color(color).to_string()
        } else {
            text.to_string()
        }
    }

    fn bold(&self, text: &str) -> String {
        if self.use_color {
            text.bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// Headline plus per-target table
    pub fn format_run(&self, summary: &RunSummary, targets: &[Target]) -> String {
        let mut out = String::new();
        out.push_str(&self.format_summary(summary));
        out.push('\n');
        if !summary.results.is_empty() {
            out.push('\n');
            out.push_str(&self.format_results_table(&summary.results, targets));
        }
        out
    }

    pub fn format_summary(&self, summary: &RunSummary) -> String {
        let status_color = if summary.failed {
            Color::Red
        } else if summary.cancelled {
            Color::Yellow
        } else {
            Color::Green
        };

        let mut out = String::new();
        let _ = writeln!(out, "{}", self.bold(&self.paint(&summary.message(), status_color)));
        let _ = write!(
            out,
            "  profile {} | mode {} | {:.2}s",
            summary.profile_id,
            summary.mode,
            summary.elapsed_ms as f64 / 1000.0
        );
        if let Some(task_id) = &summary.task_id {
            let _ = write!(out, " | task {}", task_id);
        }
        if let Some(error) = &summary.error {
            let _ = write!(out, "\n  {}", self.paint(&format!("error: {}", error), Color::Red));
        }
        if !summary.persisted {
            let _ = write!(
                out,
                "\n  {}",
                self.paint("warning: results could not be saved to the catalog", Color::Yellow)
            );
        }

        if self.verbose {
            for phase in &summary.phases {
                let _ = write!(
                    out,
                    "\n  {} phase: {}/{} probed, {} ok, limit {} (peak {}), {}ms",
                    phase.kind,
                    phase.completed,
                    phase.scheduled,
                    phase.succeeded,
                    phase.admission.limit,
                    phase.admission.peak_in_flight,
                    phase.elapsed_ms
                );
            }
            for (group, bytes) in &summary.traffic.by_group {
                let _ = write!(out, "\n  traffic group {}: {}", group, format_bytes(*bytes));
            }
            for (source, bytes) in &summary.traffic.by_source {
                let _ = write!(out, "\n  traffic source {}: {}", source, format_bytes(*bytes));
            }
        }
        out
    }

    pub fn format_results_table(&self, results: &[SpeedTestResult], targets: &[Target]) -> String {
        let names: HashMap<u64, &str> = targets.iter().map(|t| (t.id, t.label())).collect();
        let width = results
            .iter()
            .map(|r| names.get(&r.target_id).map_or(0, |n| n.chars().count()))
            .max()
            .unwrap_or(0)
            .clamp(6, 40);

        let mut out = String::new();
        let header = format!(
            "{:>6}  {:<width$}  {:>9}  {:>10}  {:>10}  {:<4}",
            "ID",
            "Target",
            "Latency",
            "Speed",
            "Traffic",
            "Geo",
            width = width
        );
        let _ = writeln!(out, "{}", self.bold(&header));

        for row in results {
            let name: String = names
                .get(&row.target_id)
                .copied()
                .unwrap_or("?")
                .chars()
                .take(width)
                .collect();

            let latency = match row.latency_status {
                LatencyStatus::Success => {
                    let text = format!("{:>7}ms", row.latency_ms);
                    self.paint(&text, LatencyLevel::from_millis(row.latency_ms).color())
                }
                LatencyStatus::Timeout => self.paint(&format!("{:>9}", "timeout"), Color::Red),
                LatencyStatus::Untested => format!("{:>9}", "-"),
            };
            let speed = match row.speed_status {
                SpeedStatus::Success => self.paint(&format!("{:>6.2}MB/s", row.speed_mbps), Color::Green),
                SpeedStatus::Error => self.paint(&format!("{:>10}", "error"), Color::Red),
                SpeedStatus::Untested => format!("{:>10}", "-"),
            };
            let traffic = if row.bytes_transferred > 0 {
                format_bytes(row.bytes_transferred)
            } else {
                "-".to_string()
            };

            let _ = writeln!(
                out,
                "{:>6}  {:<width$}  {}  {}  {:>10}  {:<4}",
                row.target_id,
                name,
                latency,
                speed,
                traffic,
                row.country_code.as_deref().unwrap_or("-"),
                width = width
            );
        }
        out
    }

    pub fn format_profiles(&self, profiles: &[SpeedTestProfile]) -> String {
        if profiles.is_empty() {
            return "No profiles in catalog".to_string();
        }

        let mut out = String::new();
        let _ = writeln!(
            out,
            "{}",
            self.bold(&format!("{:>6}  {:<24}  {:<5}  {:>8}  {:>8}", "ID", "Name", "Mode", "Timeout", "Workers"))
        );
        for profile in profiles {
            let timeout = if profile.timeout_seconds == 0 {
                "default".to_string()
            } else {
                format!("{}s", profile.timeout_seconds)
            };
            let workers = match (profile.latency_concurrency, profile.speed_concurrency) {
                (0, 0) => "auto".to_string(),
                (l, s) => format!("{}/{}", l, s),
            };
            let _ = writeln!(
                out,
                "{:>6}  {:<24}  {:<5}  {:>8}  {:>8}",
                profile.id,
                profile.name.chars().take(24).collect::<String>(),
                profile.mode,
                timeout,
                workers
            );
        }
        out
    }
}
