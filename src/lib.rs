//! Proxy Speed Test
//!
//! An adaptive two-phase measurement pipeline for proxy fleets. A run probes
//! every target's latency, then measures throughput through the survivors,
//! with concurrency tuned by an AIMD admission controller, cooperative
//! cancellation and a single persistence and reporting path at the end.

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod executor;
pub mod geo;
pub mod hosts;
pub mod logging;
pub mod measure;
pub mod models;
pub mod output;
pub mod pipeline;
pub mod task;
pub mod types;

// Re-export commonly used types
pub use catalog::{JsonFileCatalog, MemoryCatalog, ProfileStore, TargetCatalog};
pub use error::{AppError, Result};
pub use executor::{AdmissionConfig, AdmissionController, PhaseKind};
pub use measure::{HttpMeasurer, Measurer, ScriptedMeasurer};
pub use models::{Config, HostMapping, SpeedTestProfile, SpeedTestResult, Target};
pub use output::SummaryFormatter;
pub use pipeline::{Collaborators, RunHandle, RunSummary, SpeedTestPipeline};
pub use task::{TaskBridge, TaskManager, TaskStatus, TaskTrigger};

/// Application version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub const PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
    pub const DEFAULT_LATENCY_URL: &str = "https://www.gstatic.com/generate_204";
    pub const DEFAULT_SPEED_TEST_URL: &str = "https://speed.cloudflare.com/__down?bytes=20971520";
    pub const DEFAULT_LANDING_IP_URL: &str = "https://api.ipify.org";
    pub const DEFAULT_GEO_ENDPOINT: &str = "https://ipinfo.io/{ip}/country";
    pub const DEFAULT_PEAK_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);
    /// Throughput probes stop after this many bytes
    pub const DEFAULT_MAX_BYTES: u64 = 20 * 1024 * 1024;
    pub const DEFAULT_CATALOG_PATH: &str = "catalog.json";
    pub const DEFAULT_ENABLE_COLOR: bool = true;
}
