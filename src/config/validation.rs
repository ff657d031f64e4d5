use super::models::Config;
use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Url;
use thiserror::Error;

const MAX_REDIRECTS: usize = 20;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid base URL '{url}': {reason}")]
    InvalidBaseUrl { url: String, reason: String },

    #[error("Timeout must be positive: {field}")]
    InvalidTimeout { field: &'static str },

    #[error("max_redirects ({actual}) exceeds limit of {limit}")]
    TooManyRedirects { actual: usize, limit: usize },

    #[error("Invalid default header name '{name}'")]
    InvalidHeaderName { name: String },

    #[error("Invalid value for default header '{name}'")]
    InvalidHeaderValue { name: String },

    #[error("max_response_bytes must be positive")]
    InvalidResponseLimit,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_base_url(config)?;
    validate_headers(config)?;
    validate_http(config)?;
    Ok(())
}

/// The base URL, when set, must be absolute and use http or https
fn validate_base_url(config: &Config) -> Result<(), ValidationError> {
    let Some(raw) = &config.service.base_url else {
        return Ok(());
    };

    let invalid = |reason: String| ValidationError::InvalidBaseUrl {
        url: raw.clone(),
        reason,
    };
    let url = Url::parse(raw).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" => Ok(()),
        other => Err(invalid(format!("unsupported scheme '{}'", other))),
    }
}

fn validate_headers(config: &Config) -> Result<(), ValidationError> {
    for (name, value) in &config.service.default_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            return Err(ValidationError::InvalidHeaderName { name: name.clone() });
        }
        if HeaderValue::from_str(value).is_err() {
            return Err(ValidationError::InvalidHeaderValue { name: name.clone() });
        }
    }
    Ok(())
}

fn validate_http(config: &Config) -> Result<(), ValidationError> {
    let http = &config.http;
    if http.connect_timeout_ms == 0 {
        return Err(ValidationError::InvalidTimeout {
            field: "connect_timeout_ms",
        });
    }
    if http.request_timeout_ms == 0 {
        return Err(ValidationError::InvalidTimeout {
            field: "request_timeout_ms",
        });
    }
    if http.max_redirects > MAX_REDIRECTS {
        return Err(ValidationError::TooManyRedirects {
            actual: http.max_redirects,
            limit: MAX_REDIRECTS,
        });
    }
    if http.max_response_bytes.as_u64() == 0 {
        return Err(ValidationError::InvalidResponseLimit);
    }
    Ok(())
}
