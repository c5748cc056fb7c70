//! Configuration management module

pub mod env;
pub mod parser;
pub mod snapshot;

// Re-export main functionality
pub use env::EnvManager;
pub use parser::{display_config_summary, load_config, ConfigParser};
pub use snapshot::{ProfileOverrides, RunConfig};

// Re-export from models for convenience
pub use crate::models::Config;
