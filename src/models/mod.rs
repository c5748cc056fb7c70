//! Data models for profiles, targets and results

pub mod config;
pub mod profile;
pub mod target;

// Re-export main model types
pub use config::Config;
pub use profile::SpeedTestProfile;
pub use target::{HostMapping, HostSource, NodeResult, SpeedTestResult, Target, FAILED};
