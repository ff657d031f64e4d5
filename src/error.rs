//! Error taxonomy shared by every stage of a service task.

use std::sync::Arc;
use thiserror::Error;

/// Boxed error returned by user-supplied handlers and providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Shared form of a boxed error, so a single failure can be observed by many stages.
pub type SharedError = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Failure carried by [`ServiceResult::Failure`](crate::result::ServiceResult).
///
/// Cloning is cheap: every wrapped source is reference counted.
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    /// Reported verbatim by the network provider.
    #[error("transport error: {0}")]
    Transport(SharedError),

    /// Raised by the delegate's validation hook. Supersedes a transport error.
    #[error("response validation failed: {0}")]
    Validation(SharedError),

    /// The asynchronous or background body provider failed.
    #[error("request body could not be produced: {0}")]
    Body(SharedError),

    #[error("JSON decoding failed: response body is empty")]
    MissingBody,

    #[error("JSON decoding failed: {0}")]
    JsonDecode(Arc<serde_json::Error>),

    /// Raised by a `response`, `transform`, `response_json` or `recover` handler.
    #[error("handler failed: {0}")]
    Handler(SharedError),

    #[error("result holds no value")]
    NoValue,

    #[error("result value is not a `{0}`")]
    TypeMismatch(&'static str),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("request encoding failed: {0}")]
    Encoding(String),

    #[error("request can no longer be modified once the network task exists")]
    RequestLocked,

    #[error("configuration error: {0}")]
    Config(String),
}

impl ServiceError {
    pub fn transport(err: impl Into<BoxError>) -> Self {
        ServiceError::Transport(Arc::from(err.into()))
    }

    pub fn validation(err: impl Into<BoxError>) -> Self {
        ServiceError::Validation(Arc::from(err.into()))
    }

    pub fn body(err: impl Into<BoxError>) -> Self {
        ServiceError::Body(Arc::from(err.into()))
    }

    /// Wrap an error raised by a stage handler.
    ///
    /// A handler that re-raises a `ServiceError` keeps its original variant.
    pub fn from_handler(err: BoxError) -> Self {
        match err.downcast::<ServiceError>() {
            Ok(service) => *service,
            Err(other) => ServiceError::Handler(Arc::from(other)),
        }
    }

    /// Returns the wrapped source when it is of type `E`.
    pub fn source_as<E: std::error::Error + 'static>(&self) -> Option<&E> {
        match self {
            ServiceError::Transport(e)
            | ServiceError::Validation(e)
            | ServiceError::Body(e)
            | ServiceError::Handler(e) => e.downcast_ref::<E>(),
            ServiceError::JsonDecode(e) => (e.as_ref() as &dyn std::error::Error).downcast_ref::<E>(),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(value: serde_json::Error) -> Self {
        ServiceError::JsonDecode(Arc::new(value))
    }
}

impl From<url::ParseError> for ServiceError {
    fn from(value: url::ParseError) -> Self {
        ServiceError::InvalidUrl(value.to_string())
    }
}

/// Errors produced by network providers.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Connection timeout")]
    Timeout,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Too many redirects")]
    TooManyRedirects,

    #[error("Response body of {actual} bytes exceeds limit of {limit} bytes")]
    BodyTooLarge { limit: u64, actual: u64 },
}

/// Raised by the status-checking validation hook for non-2xx responses.
#[derive(Debug, Error)]
#[error("HTTP {status}")]
pub struct HttpStatusError {
    pub status: reqwest::StatusCode,
}
