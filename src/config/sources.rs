use super::models::Config;
use config::{ConfigError, Environment, File};
use std::env;
use std::path::PathBuf;

const CONFIG_ENV_VAR: &str = "SERVICETASK_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "config/servicetask.toml";
const ENV_PREFIX: &str = "SERVICETASK";
const ENV_SEPARATOR: &str = "__";

/// Path of the configuration file: `SERVICETASK_CONFIG` or the default location.
pub fn config_path() -> PathBuf {
    env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Load configuration with priority (lowest to highest):
/// 1. Defaults (embedded in structs)
/// 2. TOML file (if exists)
/// 3. Environment variables from .env file (via dotenvy)
/// 4. System environment variables
pub fn load() -> Result<Config, ConfigError> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();
    load_from_sources(config_path())
}

/// Load configuration from a specific path and the environment
pub fn load_from_sources(config_path: PathBuf) -> Result<Config, ConfigError> {
    let mut builder = config::Config::builder();

    if config_path.exists() {
        tracing::info!(path = %config_path.display(), "Loading configuration");
        builder = builder.add_source(File::from(config_path).required(false));
    } else {
        tracing::debug!(
            path = %config_path.display(),
            "Configuration file not found, using defaults and environment overrides"
        );
    }

    // SERVICETASK__HTTP__USER_AGENT -> http.user_agent
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .separator(ENV_SEPARATOR)
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_load_defaults_only() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("nonexistent.toml");

        let config = load_from_sources(config_path).unwrap();
        assert!(config.service.base_url.is_none());
        assert_eq!(config.http.max_redirects, 10);
        assert_eq!(config.http.max_response_bytes.as_u64(), 10 * 1024 * 1024);
    }

    #[test]
    fn test_load_from_toml() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("test.toml");

        let toml_content = r#"
[service]
base_url = "https://api.example.com/v1/"
reject_http_errors = true

[service.default_headers]
accept = "application/json"

[http]
connect_timeout_ms = 2500
max_response_bytes = "512KB"
        "#;

        fs::write(&config_path, toml_content).unwrap();

        let config = load_from_sources(config_path).unwrap();
        assert_eq!(
            config.service.base_url.as_deref(),
            Some("https://api.example.com/v1/")
        );
        assert!(config.service.reject_http_errors);
        assert_eq!(
            config.service.default_headers.get("accept").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(config.http.connect_timeout_ms, 2500);
        assert_eq!(config.http.request_timeout_ms, 60_000);
        assert_eq!(config.http.max_response_bytes.as_u64(), 512 * 1024);
    }

    // Environment overrides are not exercised here: mutating the process
    // environment is unsafe while other tests run in parallel.
}
