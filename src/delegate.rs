//! Cross-cutting observer of service tasks

use bytes::Bytes;
use uuid::Uuid;

use crate::error::{BoxError, ServiceError};
use crate::metrics::ServiceTaskMetrics;
use crate::network::HttpResponse;
use crate::request::ServiceRequest;

/// Raw outcome of a network handle, as seen by the validation hook.
#[derive(Debug, Clone, Copy)]
pub struct ResponseContext<'a> {
    pub task_id: Uuid,
    pub request: Option<&'a ServiceRequest>,
    pub body: Option<&'a Bytes>,
    pub response: Option<&'a HttpResponse>,
    pub error: Option<&'a ServiceError>,
}

/// Observer shared by many tasks. Tasks hold it weakly, so it may go away at
/// any time; every method has a no-op default.
pub trait ServiceTaskDelegate: Send + Sync {
    /// Validation hook run inside the network completion. An error replaces the
    /// task's result, superseding any transport error.
    fn validate_response(&self, _ctx: &ResponseContext<'_>) -> Result<(), BoxError> {
        Ok(())
    }

    /// First network-level failure of a task. Not called for validation errors
    /// or for failures raised by later stages.
    fn service_result_failure(
        &self,
        _task_id: Uuid,
        _response: Option<&HttpResponse>,
        _error: &ServiceError,
    ) {
    }

    fn will_begin_update_ui(&self, _task_id: Uuid) {}

    fn did_finish_update_ui(&self, _task_id: Uuid) {}

    fn did_finish_collecting_metrics(
        &self,
        _task_id: Uuid,
        _metrics: &ServiceTaskMetrics,
        _request: Option<&ServiceRequest>,
        _response: Option<&HttpResponse>,
    ) {
    }
}
