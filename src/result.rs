//! Outcome of a pipeline stage

use std::any::{Any, type_name};
use std::fmt;
use std::sync::Arc;

use crate::error::{BoxError, ServiceError};

/// Untyped value threaded between stages.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// Tagged result observed and overwritten by each stage of a task's pipeline.
#[derive(Clone, Default)]
pub enum ServiceResult {
    #[default]
    Empty,
    Value(Payload),
    Failure(ServiceError),
}

impl ServiceResult {
    pub fn from_value<T: Any + Send + Sync>(value: T) -> Self {
        ServiceResult::Value(Arc::new(value))
    }

    /// Build a failure from any error; a `ServiceError` is kept as is.
    pub fn failure(err: impl Into<BoxError>) -> Self {
        ServiceResult::Failure(ServiceError::from_handler(err.into()))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, ServiceResult::Empty)
    }

    pub fn is_value(&self) -> bool {
        matches!(self, ServiceResult::Value(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, ServiceResult::Failure(_))
    }

    pub fn error(&self) -> Option<&ServiceError> {
        match self {
            ServiceResult::Failure(err) => Some(err),
            _ => None,
        }
    }

    /// Extract the payload.
    ///
    /// Fails with [`ServiceError::NoValue`] on `Empty` and re-raises the stored
    /// error on `Failure`.
    pub fn value(&self) -> Result<Payload, ServiceError> {
        match self {
            ServiceResult::Value(payload) => Ok(payload.clone()),
            ServiceResult::Empty => Err(ServiceError::NoValue),
            ServiceResult::Failure(err) => Err(err.clone()),
        }
    }

    /// Extract the payload as a concrete type.
    pub fn value_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, ServiceError> {
        downcast_payload(self.value()?)
    }
}

/// Downcast a payload to `T`, reporting the expected type on mismatch.
pub fn downcast_payload<T: Any + Send + Sync>(payload: Payload) -> Result<Arc<T>, ServiceError> {
    payload
        .downcast::<T>()
        .map_err(|_| ServiceError::TypeMismatch(type_name::<T>()))
}

impl From<Result<ServiceResult, BoxError>> for ServiceResult {
    fn from(value: Result<ServiceResult, BoxError>) -> Self {
        match value {
            Ok(result) => result,
            Err(err) => ServiceResult::Failure(ServiceError::from_handler(err)),
        }
    }
}

impl fmt::Debug for ServiceResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceResult::Empty => f.write_str("Empty"),
            ServiceResult::Value(_) => f.write_str("Value(..)"),
            ServiceResult::Failure(err) => f.debug_tuple("Failure").field(err).finish(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_extraction() {
        let result = ServiceResult::from_value(42u32);
        assert!(result.is_value());
        assert_eq!(*result.value_as::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_empty_extraction_fails_with_no_value() {
        let result = ServiceResult::Empty;
        assert!(matches!(result.value(), Err(ServiceError::NoValue)));
    }

    #[test]
    fn test_failure_extraction_reraises() {
        let result = ServiceResult::failure("boom");
        let err = result.value().unwrap_err();
        assert_eq!(err.to_string(), "handler failed: boom");
        assert!(result.error().is_some());
    }

    #[test]
    fn test_type_mismatch() {
        let result = ServiceResult::from_value("text".to_string());
        assert!(matches!(
            result.value_as::<u64>(),
            Err(ServiceError::TypeMismatch(_))
        ));
    }

    #[test]
    fn test_from_handler_outcome() {
        let ok: Result<ServiceResult, BoxError> = Ok(ServiceResult::from_value(1i32));
        assert!(ServiceResult::from(ok).is_value());

        let err: Result<ServiceResult, BoxError> = Err("bad".into());
        assert!(ServiceResult::from(err).is_failure());
    }
}
