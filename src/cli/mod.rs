//! Command-line interface

use crate::config::ProfileOverrides;
use crate::types::TestMode;
use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

/// Proxy Speed Test - adaptive latency and throughput checks for proxy fleets
#[derive(Parser, Debug, Clone)]
#[command(name = "pst")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path of the JSON catalog with profiles and targets
    #[arg(long, global = true, value_name = "PATH")]
    pub catalog: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Enable verbose output
    #[arg(long, global = true)]
    pub verbose: bool,

    /// Enable debug output
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format: console, json or compact
    #[arg(long, global = true, value_name = "FORMAT", value_parser = ["console", "json", "compact"])]
    pub log_format: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run a speed test profile against its targets
    Run(RunArgs),
    /// List the profiles stored in the catalog
    Profiles,
    /// Show supported environment variables
    EnvHelp,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// Profile to run
    #[arg(short, long)]
    pub profile: u64,

    /// Only test these targets (can be used multiple times)
    #[arg(short, long = "target", value_name = "ID", action = ArgAction::Append)]
    pub targets: Vec<u64>,

    /// Override the profile mode (tcp or full)
    #[arg(long)]
    pub mode: Option<TestMode>,

    /// Override the probe timeout in seconds
    #[arg(long, value_name = "SECS", value_parser = parse_timeout)]
    pub timeout: Option<u64>,

    /// Fixed latency concurrency, 0 for adaptive
    #[arg(long, value_name = "N")]
    pub latency_concurrency: Option<usize>,

    /// Fixed throughput concurrency, 0 for adaptive
    #[arg(long, value_name = "N")]
    pub speed_concurrency: Option<usize>,

    /// Print the run summary as JSON
    #[arg(long)]
    pub json: bool,
}

impl RunArgs {
    /// Profile overrides given on the command line
    pub fn overrides(&self) -> ProfileOverrides {
        ProfileOverrides {
            mode: self.mode,
            timeout_seconds: self.timeout,
            latency_concurrency: self.latency_concurrency,
            speed_concurrency: self.speed_concurrency,
        }
    }

    /// Target subset, `None` for every target in the catalog
    pub fn target_ids(&self) -> Option<Vec<u64>> {
        (!self.targets.is_empty()).then(|| self.targets.clone())
    }
}

impl Cli {
    /// Check if colors should be enabled
    pub fn use_colors(&self) -> bool {
        !self.no_color && supports_color()
    }

    pub fn run_args(&self) -> Option<&RunArgs> {
        match &self.command {
            Command::Run(args) => Some(args),
            _ => None,
        }
    }
}

/// Parse a timeout in seconds
fn parse_timeout(s: &str) -> Result<u64, String> {
    // Reject strings with leading + sign or other invalid formats
    if s.starts_with('+') || s.starts_with("0x") || s.starts_with("0X") {
        return Err(format!("Invalid timeout: {}", s));
    }

    s.parse::<u64>()
        .map_err(|_| format!("Invalid timeout: {}", s))
        .and_then(|secs| {
            if secs == 0 {
                Err("Timeout must be greater than 0".to_string())
            } else if secs > crate::models::profile::MAX_TIMEOUT_SECONDS {
                Err(format!(
                    "Timeout cannot exceed {} seconds",
                    crate::models::profile::MAX_TIMEOUT_SECONDS
                ))
            } else {
                Ok(secs)
            }
        })
}

/// Check if the terminal supports color output
fn supports_color() -> bool {
    if let Ok(term) = std::env::var("TERM") {
        if term == "dumb" {
            return false;
        }
    }

    if std::env::var("NO_COLOR").is_ok() {
        return false;
    }

    if std::env::var("FORCE_COLOR").is_ok() {
        return true;
    }

    #[cfg(target_os = "windows")]
    {
        if std::env::var("ANSICON").is_ok() || std::env::var("ConEmuANSI").is_ok() {
            return true;
        }
    }

    #[cfg(unix)]
    {
        true
    }
    #[cfg(not(unix))]
    {
        false
    }
}
