//! Application configuration data model and validation

use crate::types::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Process-wide settings for the command line front-end.
///
/// Per-run measurement settings live in the stored profile, not here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path of the JSON catalog holding profiles, targets and results
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,

    /// Enable colored terminal output
    #[serde(default = "default_enable_color")]
    pub enable_color: bool,

    /// Enable verbose output
    #[serde(default)]
    pub verbose: bool,

    /// Enable debug output
    #[serde(default)]
    pub debug: bool,

    /// Log output format: console, json or compact
    #[serde(default = "default_log_format")]
    pub log_format: String,

    /// Country lookup endpoint; `{ip}` is replaced with the landing IP
    #[serde(default = "default_geo_endpoint")]
    pub geo_endpoint: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_path: default_catalog_path(),
            enable_color: default_enable_color(),
            verbose: false,
            debug: false,
            log_format: default_log_format(),
            geo_endpoint: default_geo_endpoint(),
        }
    }
}

impl Config {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate the configuration and return any errors
    pub fn validate(&self) -> Result<()> {
        if self.catalog_path.as_os_str().is_empty() {
            return Err(AppError::config("Catalog path cannot be empty"));
        }

        match self.log_format.to_lowercase().as_str() {
            "console" | "json" | "compact" => {}
            other => {
                return Err(AppError::config(format!(
                    "Invalid log format '{}': expected console, json or compact",
                    other
                )))
            }
        }

        if !self.geo_endpoint.contains("{ip}") {
            return Err(AppError::config(format!(
                "Geo endpoint must contain an {{ip}} placeholder: {}",
                self.geo_endpoint
            )));
        }

        let probe = self.geo_endpoint.replace("{ip}", "127.0.0.1");
        url::Url::parse(&probe)
            .map_err(|e| AppError::config(format!("Invalid geo endpoint '{}': {}", self.geo_endpoint, e)))?;

        Ok(())
    }

    /// Merge environment variables into this configuration
    pub fn merge_from_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CATALOG_PATH") {
            if !path.trim().is_empty() {
                self.catalog_path = PathBuf::from(path.trim());
            }
        }

        if let Ok(enable_color) = std::env::var("ENABLE_COLOR") {
            self.enable_color = enable_color
                .parse()
                .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", enable_color, e)))?;
        }

        if let Ok(format) = std::env::var("LOG_FORMAT") {
            self.log_format = format.trim().to_lowercase();
        }

        if let Ok(endpoint) = std::env::var("GEO_ENDPOINT") {
            self.geo_endpoint = endpoint.trim().to_string();
        }

        Ok(())
    }
}

// Default value functions for serde
fn default_catalog_path() -> PathBuf {
    PathBuf::from(crate::defaults::DEFAULT_CATALOG_PATH)
}

fn default_enable_color() -> bool {
    crate::defaults::DEFAULT_ENABLE_COLOR
}

fn default_log_format() -> String {
    "console".to_string()
}

fn default_geo_endpoint() -> String {
    crate::defaults::DEFAULT_GEO_ENDPOINT.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_catalog_path_invalid() {
        let mut config = Config::default();
        config.catalog_path = PathBuf::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_log_format_invalid() {
        let mut config = Config::default();
        config.log_format = "xml".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_geo_endpoint_needs_placeholder() {
        let mut config = Config::default();
        config.geo_endpoint = "https://ipinfo.io/country".to_string();
        assert!(config.validate().is_err());
    }
}
