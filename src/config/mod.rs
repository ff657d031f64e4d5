//! Configuration management for servicetask
//!
//! This module provides a layered configuration system that loads settings from:
//! 1. Default values (embedded in structs)
//! 2. TOML configuration file
//! 3. Environment variables (highest priority)
//!
//! # Usage
//!
//! ```no_run
//! use servicetask::config::Config;
//!
//! let config = Config::load().expect("Failed to load configuration");
//! println!("Base URL: {:?}", config.service.base_url);
//! ```
//!
//! # Environment Variables
//!
//! Configuration can be overridden using environment variables with the pattern:
//! `SERVICETASK__<section>__<key>`
//!
//! Examples:
//! - `SERVICETASK__SERVICE__BASE_URL=https://api.example.com`
//! - `SERVICETASK__HTTP__REQUEST_TIMEOUT_MS=5000`
//! - `SERVICETASK__HTTP__MAX_RESPONSE_BYTES=2MB`
//!
//! # Configuration File
//!
//! By default, the configuration is loaded from `config/servicetask.toml`.
//! This can be overridden using the `SERVICETASK_CONFIG` environment variable.

mod models;
mod sources;
mod validation;

pub use crate::humanize::ByteSize;
pub use models::{Config, HttpSettings, ServiceConfig};
pub use validation::ValidationError;

use crate::error::ServiceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("Configuration validation failed: {0}")]
    ValidationError(#[from] ValidationError),
}

impl From<ConfigError> for ServiceError {
    fn from(value: ConfigError) -> Self {
        ServiceError::Config(value.to_string())
    }
}

impl Config {
    /// Load configuration from all sources (file + environment)
    ///
    /// Configuration is loaded with the following priority (highest to lowest):
    /// 1. Environment variables (`SERVICETASK__*`)
    /// 2. TOML file (default: `config/servicetask.toml`)
    /// 3. Default values
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file is malformed
    /// - Validation fails (bad base URL, zero timeouts, invalid headers, etc.)
    pub fn load() -> Result<Self, ConfigError> {
        let config = sources::load()?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: std::path::PathBuf) -> Result<Self, ConfigError> {
        let config = sources::load_from_sources(path)?;
        validation::validate(&config)?;
        Ok(config)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_full_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[service]
base_url = "http://localhost:8080/api/"
reject_http_errors = true

[service.default_headers]
accept = "application/json"
x-client = "servicetask"

[http]
connect_timeout_ms = 1000
request_timeout_ms = 5000
user_agent = "zip-lookup/1.0"
max_redirects = 3
max_response_bytes = "1MB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = Config::load_from_path(config_path).unwrap();
        assert_eq!(config.service.default_headers.len(), 2);

        let http = config.http.to_http_config();
        assert_eq!(http.connect_timeout.as_millis(), 1000);
        assert_eq!(http.request_timeout.as_millis(), 5000);
        assert_eq!(http.user_agent, "zip-lookup/1.0");
        assert_eq!(http.max_redirects, 3);
        assert_eq!(http.max_response_bytes.as_u64(), 1024 * 1024);
    }

    #[test]
    fn test_effective_config_round_trips_through_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("effective.toml");

        let mut config = Config::default();
        config.service.base_url = Some("https://api.example.com/".to_string());
        config.http.max_response_bytes = ByteSize(2 * 1024 * 1024);

        let rendered = config.to_toml().unwrap();
        assert!(rendered.contains("max_response_bytes = \"2MB\""));

        fs::write(&config_path, rendered).unwrap();
        let reloaded = Config::load_from_path(config_path).unwrap();
        assert_eq!(reloaded.service.base_url, config.service.base_url);
        assert_eq!(reloaded.http.max_response_bytes, config.http.max_response_bytes);
    }

    #[test]
    fn test_validation_rejects_bad_base_url() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[service]\nbase_url = \"not a url\"\n").unwrap();

        let result = Config::load_from_path(config_path);
        assert!(matches!(
            result.unwrap_err(),
            ConfigError::ValidationError(ValidationError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn test_malformed_file_is_load_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        fs::write(&config_path, "[http]\nmax_response_bytes = \"lots\"\n").unwrap();

        assert!(matches!(
            Config::load_from_path(config_path),
            Err(ConfigError::LoadError(_))
        ));
    }
}
