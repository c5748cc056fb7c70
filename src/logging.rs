//! Structured logging for speed test runs
//!
//! Entries go to stderr so stdout stays reserved for run output. A [`Logger`]
//! renders entries as console lines, JSON objects or compact lines; a
//! [`RunLogger`] wraps one and stamps every entry with the run's correlation
//! id, which is the task id for tracked runs.

use crate::error::{AppError, Result};
use crate::executor::admission::{Adjustment, PhaseKind};
use crate::models::{Config, Target};
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }

    fn painted(&self) -> ColoredString {
        let label = format!("{:>5}", self.as_str());
        match self {
            LogLevel::Trace => label.dimmed(),
            LogLevel::Debug => label.cyan(),
            LogLevel::Info => label.green(),
            LogLevel::Warn => label.yellow(),
            LogLevel::Error => label.red().bold(),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_uppercase().as_str() {
            "TRACE" => Ok(LogLevel::Trace),
            "DEBUG" => Ok(LogLevel::Debug),
            "INFO" => Ok(LogLevel::Info),
            "WARN" | "WARNING" => Ok(LogLevel::Warn),
            "ERROR" => Ok(LogLevel::Error),
            _ => Err(AppError::parse(format!("Invalid log level: {}", s))),
        }
    }
}

/// One structured log line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub logger: String,
    pub message: String,
    /// Run the entry belongs to, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Sorted so console output is stable
    #[serde(skip_serializing_if = "BTreeMap::is_empty", default)]
    pub fields: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LogFormat {
    /// Human-readable console format
    Console,
    /// One JSON object per line
    Json,
    /// Compact single-line format
    Compact,
}

impl std::str::FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "console" | "text" => Ok(LogFormat::Console),
            "json" => Ok(LogFormat::Json),
            "compact" => Ok(LogFormat::Compact),
            _ => Err(AppError::parse(format!("Invalid log format: {}", s))),
        }
    }
}

/// Leveled logger with pluggable output format.
///
/// Clones and [`Logger::named`] copies share their fields, so a session id set
/// once appears on every component's entries.
#[derive(Clone)]
pub struct Logger {
    name: String,
    /// `None` disables output entirely
    threshold: Option<LogLevel>,
    use_color: bool,
    format: LogFormat,
    shared_fields: Arc<RwLock<BTreeMap<String, serde_json::Value>>>,
}

impl Logger {
    /// Console logger at `Info`
    pub fn new(name: String) -> Self {
        Self {
            name,
            threshold: Some(LogLevel::Info),
            use_color: true,
            format: LogFormat::Console,
            shared_fields: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }

    /// Level and format follow the app config: debug logs JSON at `Debug`,
    /// verbose logs at `Info`, otherwise only warnings and errors.
    pub fn with_config(name: String, config: &Config) -> Self {
        let threshold = if config.debug {
            LogLevel::Debug
        } else if config.verbose {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        let format = if config.debug {
            LogFormat::Json
        } else {
            config.log_format.parse().unwrap_or(LogFormat::Console)
        };

        Self {
            threshold: Some(threshold),
            use_color: config.enable_color,
            format,
            ..Self::new(name)
        }
    }

    /// A logger that writes nothing, for embedding and tests
    pub fn quiet(name: &str) -> Self {
        Self {
            threshold: None,
            ..Self::new(name.to_string())
        }
    }

    pub fn set_level(&mut self, level: LogLevel) {
        self.threshold = Some(level);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same settings and shared fields under another name
    pub fn named(&self, name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..self.clone()
        }
    }

    /// Attach a field to every later entry of this logger and its copies
    pub async fn set_shared_field<T: Serialize>(&self, key: &str, value: T) {
        if let Ok(value) = serde_json::to_value(value) {
            self.shared_fields.write().await.insert(key.to_string(), value);
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        self.threshold.is_some_and(|threshold| level >= threshold)
    }

    pub fn log(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        LogEntryBuilder::new(self, level, message)
    }

    pub fn debug(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Debug, message)
    }

    pub fn info(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Info, message)
    }

    pub fn warn(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Warn, message)
    }

    pub fn error(&self, message: &str) -> LogEntryBuilder<'_> {
        self.log(LogLevel::Error, message)
    }

    async fn write_entry(&self, mut entry: LogEntry) {
        if !self.enabled(entry.level) {
            return;
        }
        for (key, value) in self.shared_fields.read().await.iter() {
            entry.fields.entry(key.clone()).or_insert_with(|| value.clone());
        }

        let line = self.render(&entry);
        let _ = writeln!(io::stderr().lock(), "{}", line);
    }

    fn render(&self, entry: &LogEntry) -> String {
        match self.format {
            LogFormat::Console => self.format_console(entry),
            LogFormat::Json => serde_json::to_string(entry)
                .unwrap_or_else(|_| format!("{{\"level\":\"{}\",\"message\":{:?}}}", entry.level.as_str(), entry.message)),
            LogFormat::Compact => format!(
                "{} {} {}: {}",
                entry.timestamp.format("%H:%M:%S"),
                &entry.level.as_str()[..1],
                entry.logger,
                entry.message
            ),
        }
    }

    fn format_console(&self, entry: &LogEntry) -> String {
        let level = if self.use_color {
            entry.level.painted().to_string()
        } else {
            format!("{:>5}", entry.level.as_str())
        };

        let mut output = format!(
            "{} {} [{}] {}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S%.3f"),
            level,
            entry.logger,
            entry.message
        );
        if let Some(correlation_id) = &entry.correlation_id {
            let short: String = correlation_id.chars().take(8).collect();
            output.push_str(&format!(" [{}]", short));
        }
        if !entry.fields.is_empty() {
            let fields: Vec<String> = entry.fields.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            output.push_str(&format!(" {{{}}}", fields.join(", ")));
        }
        output
    }
}

/// Accumulates fields for one entry; nothing is written until [`log`](Self::log)
pub struct LogEntryBuilder<'a> {
    logger: &'a Logger,
    entry: LogEntry,
}

impl<'a> LogEntryBuilder<'a> {
    fn new(logger: &'a Logger, level: LogLevel, message: &str) -> Self {
        Self {
            logger,
            entry: LogEntry {
                timestamp: Utc::now(),
                level,
                logger: logger.name.clone(),
                message: message.to_string(),
                correlation_id: None,
                fields: BTreeMap::new(),
            },
        }
    }

    pub fn correlation_id(mut self, id: &str) -> Self {
        self.entry.correlation_id = Some(id.to_string());
        self
    }

    pub fn field<T: Serialize>(mut self, key: &str, value: T) -> Self {
        if let Ok(value) = serde_json::to_value(value) {
            self.entry.fields.insert(key.to_string(), value);
        }
        self
    }

    /// Target id, label and group
    pub fn target(self, target: &Target) -> Self {
        let builder = self.field("target_id", target.id).field("target", target.label());
        if target.group.is_empty() {
            builder
        } else {
            builder.field("group", &target.group)
        }
    }

    pub fn error_info(self, error: &AppError) -> Self {
        self.field("error_category", error.category())
            .field("error_recoverable", error.is_recoverable())
    }

    pub async fn log(self) {
        self.logger.write_entry(self.entry).await;
    }
}

/// Logger bound to one run; every entry carries the run's correlation id
#[derive(Clone)]
pub struct RunLogger {
    logger: Logger,
    correlation_id: String,
}

impl RunLogger {
    pub fn new(logger: Logger, correlation_id: impl Into<String>) -> Self {
        Self {
            logger,
            correlation_id: correlation_id.into(),
        }
    }

    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    /// Entry builder pre-filled with the run's correlation id
    pub fn entry(&self, level: LogLevel, message: &str) -> LogEntryBuilder<'_> {
        self.logger.log(level, message).correlation_id(&self.correlation_id)
    }

    pub async fn run_started(&self, profile_id: u64, mode: &str, total: usize, tracked: bool) {
        self.entry(LogLevel::Info, &format!("Speed test started: {} targets, mode {}", total, mode))
            .field("profile_id", profile_id)
            .field("mode", mode)
            .field("total", total)
            .field("tracked", tracked)
            .log()
            .await;
    }

    pub async fn phase_started(&self, phase: PhaseKind, targets: usize, limit: usize, fixed: bool) {
        self.entry(LogLevel::Debug, &format!("{} phase started for {} targets", phase, targets))
            .field("phase", phase)
            .field("targets", targets)
            .field("initial_limit", limit)
            .field("fixed", fixed)
            .log()
            .await;
    }

    pub async fn phase_finished(&self, phase: PhaseKind, completed: usize, elapsed: Duration, cancelled: bool) {
        let suffix = if cancelled { " (cancelled)" } else { "" };
        self.entry(
            LogLevel::Info,
            &format!("{} phase finished: {} probes in {:.3}s{}", phase, completed, elapsed.as_secs_f64(), suffix),
        )
        .field("phase", phase)
        .field("completed", completed)
        .field("duration_ms", elapsed.as_millis() as u64)
        .field("cancelled", cancelled)
        .log()
        .await;
    }

    pub async fn probe_failed(&self, phase: PhaseKind, target: &Target, error: &AppError) {
        self.entry(LogLevel::Debug, &format!("{} probe failed for {}: {}", phase, target.label(), error))
            .field("phase", phase)
            .target(target)
            .error_info(error)
            .log()
            .await;
    }

    pub async fn admission_adjusted(&self, phase: PhaseKind, adjustment: Adjustment) {
        let (direction, from, to) = match adjustment {
            Adjustment::Unchanged => return,
            Adjustment::Increased { from, to } => ("increased", from, to),
            Adjustment::Decreased { from, to } => ("decreased", from, to),
            Adjustment::Clamped { from, to } => ("clamped", from, to),
        };
        self.entry(LogLevel::Debug, &format!("{} concurrency {} {} -> {}", phase, direction, from, to))
            .field("phase", phase)
            .field("from", from)
            .field("to", to)
            .log()
            .await;
    }

    /// A follow-up step failed; the run itself is unaffected
    pub async fn side_effect_failed(&self, what: &str, error: &AppError) {
        self.entry(LogLevel::Warn, &format!("{} failed: {}", what, error))
            .field("side_effect", what)
            .error_info(error)
            .log()
            .await;
    }
}

/// Builds loggers that share one session id
pub struct LoggerFactory {
    config: Config,
    session_id: String,
}

impl LoggerFactory {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            session_id: Uuid::new_v4().to_string(),
        }
    }

    pub async fn create_logger(&self, name: &str) -> Logger {
        let logger = Logger::with_config(name.to_string(), &self.config);
        logger.set_shared_field("session_id", &self.session_id).await;
        logger
    }

    pub async fn create_run_logger(&self, correlation_id: &str) -> RunLogger {
        RunLogger::new(self.create_logger("RUN").await, correlation_id)
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }
}
