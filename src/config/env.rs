//! Environment variable handling and .env file management

use crate::error::{AppError, Result};
use std::path::Path;

/// Environment variable configuration manager
pub struct EnvManager;

impl EnvManager {
    /// Load .env file if it exists
    pub fn load_env_file(debug: bool) -> Result<()> {
        Self::load_env_file_from(Path::new(".env"), debug)
    }

    /// Load a specific env file if it exists. Variables already set win.
    pub fn load_env_file_from(path: &Path, debug: bool) -> Result<()> {
        if path.exists() {
            dotenv::from_path(path)
                .map_err(|e| AppError::config(format!("Failed to load {}: {}", path.display(), e)))?;

            if debug {
                eprintln!("Loaded configuration from {}", path.display());
            }
        } else if debug {
            eprintln!("No {} file found, using defaults and CLI arguments", path.display());
        }

        Ok(())
    }

    /// Create example .env file content
    pub fn create_example_env_content() -> String {
        r#"# Proxy Speed Test Configuration
#
# Values here are used as defaults and can be overridden by command-line
# arguments. Profile overrides apply to every profile that is run.

# JSON catalog holding profiles, targets and results
# CATALOG_PATH=catalog.json

# Enable colored output (true/false)
# ENABLE_COLOR=true

# Log output format: console, json or compact
# LOG_FORMAT=console

# Country lookup endpoint, {ip} is replaced with the landing IP
# GEO_ENDPOINT=https://ipinfo.io/{ip}/country

# Profile overrides
# TEST_MODE=full
# TIMEOUT_SECONDS=5
# LATENCY_CONCURRENCY=0
# SPEED_CONCURRENCY=0
"#
        .to_string()
    }

    /// Save example .env file to disk
    pub fn save_example_env_file(path: &Path) -> Result<()> {
        let content = Self::create_example_env_content();
        std::fs::write(path, content)
            .map_err(|e| AppError::config(format!("Failed to write example .env file: {}", e)))?;

        Ok(())
    }

    /// Validate environment variable format before parsing
    pub fn validate_env_var(key: &str, value: &str) -> Result<()> {
        match key {
            "CATALOG_PATH" => {
                if value.trim().is_empty() {
                    return Err(AppError::config("CATALOG_PATH cannot be empty"));
                }
            }
            "ENABLE_COLOR" => {
                value
                    .parse::<bool>()
                    .map_err(|e| AppError::config(format!("Invalid ENABLE_COLOR value '{}': {}", value, e)))?;
            }
            "LOG_FORMAT" => {
                value
                    .parse::<crate::logging::LogFormat>()
                    .map_err(|e| AppError::config(format!("Invalid LOG_FORMAT value: {}", e)))?;
            }
            "GEO_ENDPOINT" => {
                if !value.contains("{ip}") {
                    return Err(AppError::config(format!(
                        "GEO_ENDPOINT must contain an {{ip}} placeholder: {}",
                        value
                    )));
                }
                url::Url::parse(&value.replace("{ip}", "127.0.0.1"))
                    .map_err(|e| AppError::config(format!("Invalid GEO_ENDPOINT '{}': {}", value, e)))?;
            }
            "TEST_MODE" => {
                value
                    .parse::<crate::types::TestMode>()
                    .map_err(|e| AppError::config(format!("Invalid TEST_MODE value: {}", e)))?;
            }
            "TIMEOUT_SECONDS" => {
                let timeout: u64 = value
                    .parse()
                    .map_err(|e| AppError::config(format!("Invalid TIMEOUT_SECONDS value '{}': {}", value, e)))?;
                if timeout == 0 || timeout > crate::models::profile::MAX_TIMEOUT_SECONDS {
                    return Err(AppError::config(format!(
                        "TIMEOUT_SECONDS must be between 1 and {}, got: {}",
                        crate::models::profile::MAX_TIMEOUT_SECONDS,
                        timeout
                    )));
                }
            }
            "LATENCY_CONCURRENCY" | "SPEED_CONCURRENCY" => {
                value
                    .parse::<usize>()
                    .map_err(|e| AppError::config(format!("Invalid {} value '{}': {}", key, value, e)))?;
            }
            _ => {
                // Unknown environment variable, ignore
            }
        }

        Ok(())
    }

    /// Get list of all supported environment variables with descriptions
    pub fn get_supported_env_vars() -> Vec<(&'static str, &'static str, &'static str)> {
        vec![
            ("CATALOG_PATH", "JSON catalog with profiles and targets", "catalog.json"),
            ("ENABLE_COLOR", "Enable colored output", "true"),
            ("LOG_FORMAT", "Log format: console, json or compact", "console"),
            ("GEO_ENDPOINT", "Country lookup URL with an {ip} placeholder", "https://ipinfo.io/{ip}/country"),
            ("TEST_MODE", "Override the profile mode: tcp or full", "full"),
            ("TIMEOUT_SECONDS", "Override the probe timeout (1-300)", "5"),
            ("LATENCY_CONCURRENCY", "Fixed latency concurrency, 0 for adaptive", "0"),
            ("SPEED_CONCURRENCY", "Fixed throughput concurrency, 0 for adaptive", "0"),
        ]
    }

    /// Display environment variable help
    pub fn display_env_help() -> String {
        let mut help = String::new();
        help.push_str("Supported Environment Variables:\n\n");

        for (var, description, example) in Self::get_supported_env_vars() {
            help.push_str(&format!("  {:<20} {}\n", var, description));
            help.push_str(&format!("  {:<20} Example: {}\n\n", "", example));
        }

        help.push_str("Configuration Priority (highest to lowest):\n");
        help.push_str("  1. Command-line arguments\n");
        help.push_str("  2. Environment variables\n");
        help.push_str("  3. .env file values\n");
        help.push_str("  4. Default values\n");

        help
    }

    /// Validate all currently set environment variables
    pub fn validate_current_env() -> Vec<String> {
        let mut warnings = Vec::new();

        for (var_name, _, _) in Self::get_supported_env_vars() {
            if let Ok(value) = std::env::var(var_name) {
                if let Err(e) = Self::validate_env_var(var_name, &value) {
                    warnings.push(format!("Warning: {}", e));
                }
            }
        }

        warnings
    }

    /// Validate the contents of an env file without loading it
    pub fn check_env_file(path: &Path) -> Result<Option<Vec<String>>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::config(format!("Failed to read {}: {}", path.display(), e)))?;

        let mut warnings = Vec::new();

        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let value = value.trim();

                if let Err(e) = Self::validate_env_var(key, value) {
                    warnings.push(format!("Line '{}': {}", line, e));
                }
            }
        }

        Ok(Some(warnings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{NamedTempFile, TempDir};

    #[test]
    fn test_env_manager_create_example_content() {
        let content = EnvManager::create_example_env_content();

        for (name, _, _) in EnvManager::get_supported_env_vars() {
            assert!(content.contains(&format!("{}=", name)), "missing {}", name);
        }
    }

    #[test]
    fn test_env_manager_save_example_file() {
        let temp_file = NamedTempFile::new().unwrap();
        EnvManager::save_example_env_file(temp_file.path()).unwrap();

        let content = std::fs::read_to_string(temp_file.path()).unwrap();
        assert!(content.contains("Proxy Speed Test Configuration"));
    }

    #[test]
    fn test_env_manager_validate_env_var() {
        // Valid cases
        assert!(EnvManager::validate_env_var("CATALOG_PATH", "data/catalog.json").is_ok());
        assert!(EnvManager::validate_env_var("ENABLE_COLOR", "true").is_ok());
        assert!(EnvManager::validate_env_var("LOG_FORMAT", "json").is_ok());
        assert!(EnvManager::validate_env_var("GEO_ENDPOINT", "https://geo.example.com/{ip}").is_ok());
        assert!(EnvManager::validate_env_var("TEST_MODE", "tcp").is_ok());
        assert!(EnvManager::validate_env_var("TIMEOUT_SECONDS", "10").is_ok());
        assert!(EnvManager::validate_env_var("LATENCY_CONCURRENCY", "0").is_ok());

        // Invalid cases
        assert!(EnvManager::validate_env_var("CATALOG_PATH", " ").is_err());
        assert!(EnvManager::validate_env_var("ENABLE_COLOR", "maybe").is_err());
        assert!(EnvManager::validate_env_var("LOG_FORMAT", "xml").is_err());
        assert!(EnvManager::validate_env_var("GEO_ENDPOINT", "https://geo.example.com").is_err());
        assert!(EnvManager::validate_env_var("TEST_MODE", "udp").is_err());
        assert!(EnvManager::validate_env_var("TIMEOUT_SECONDS", "0").is_err());
        assert!(EnvManager::validate_env_var("TIMEOUT_SECONDS", "301").is_err());
        assert!(EnvManager::validate_env_var("SPEED_CONCURRENCY", "-1").is_err());

        // Unknown keys are ignored
        assert!(EnvManager::validate_env_var("SOMETHING_ELSE", "x").is_ok());
    }

    #[test]
    fn test_display_env_help() {
        let help = EnvManager::display_env_help();

        assert!(help.contains("Supported Environment Variables:"));
        assert!(help.contains("CATALOG_PATH"));
        assert!(help.contains("SPEED_CONCURRENCY"));
        assert!(help.contains("Configuration Priority"));
    }

    #[test]
    fn test_check_env_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(".env");
        assert!(EnvManager::check_env_file(&path).unwrap().is_none());

        std::fs::write(&path, "# comment\nTIMEOUT_SECONDS=5\nTEST_MODE=udp\n\nENABLE_COLOR=nope\n").unwrap();
        let warnings = EnvManager::check_env_file(&path).unwrap().unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("TEST_MODE"));
    }

    #[test]
    fn test_load_missing_env_file_is_ok() {
        let dir = TempDir::new().unwrap();
        assert!(EnvManager::load_env_file_from(&dir.path().join("missing.env"), false).is_ok());
    }
}
