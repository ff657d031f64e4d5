use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

use crate::delegate::{ResponseContext, ServiceTaskDelegate};
use crate::error::ServiceError;
use crate::metrics::ServiceTaskMetrics;
use crate::network::HttpResponse;
use crate::request::ServiceRequest;
use crate::result::ServiceResult;
use crate::ui::{UiDispatcher, UiJob};

/// Callback receiving the final metrics of a task.
pub type MetricsHandler =
    Box<dyn FnOnce(&ServiceTaskMetrics, Option<&HttpResponse>) + Send + 'static>;

/// State shared between the network completion and the pipeline worker.
///
/// Before the pipeline is released only the completion writes here; afterwards
/// only pipeline stages do, one at a time.
pub(crate) struct TaskCore {
    pub(crate) id: Uuid,
    delegate: Option<Weak<dyn ServiceTaskDelegate>>,
    ui: Arc<dyn UiDispatcher>,
    state: Mutex<CoreState>,
}

#[derive(Default)]
struct CoreState {
    result: ServiceResult,
    body: Option<Bytes>,
    response: Option<HttpResponse>,
    error: Option<ServiceError>,
    json: Option<Arc<Value>>,
    metrics: ServiceTaskMetrics,
    request: Option<ServiceRequest>,
    metrics_handlers: Vec<MetricsHandler>,
}

impl TaskCore {
    pub(crate) fn new(
        id: Uuid,
        delegate: Option<Weak<dyn ServiceTaskDelegate>>,
        ui: Arc<dyn UiDispatcher>,
    ) -> Self {
        Self {
            id,
            delegate,
            ui,
            state: Mutex::new(CoreState::default()),
        }
    }

    pub(crate) fn delegate(&self) -> Option<Arc<dyn ServiceTaskDelegate>> {
        self.delegate.as_ref().and_then(Weak::upgrade)
    }

    pub(crate) fn result(&self) -> ServiceResult {
        self.state.lock().result.clone()
    }

    pub(crate) fn set_result(&self, result: ServiceResult) {
        self.state.lock().result = result;
    }

    pub(crate) fn metrics(&self) -> ServiceTaskMetrics {
        self.state.lock().metrics.clone()
    }

    pub(crate) fn update_metrics(&self, update: impl FnOnce(&mut ServiceTaskMetrics)) {
        update(&mut self.state.lock().metrics);
    }

    pub(crate) fn response_parts(&self) -> (Option<Bytes>, Option<HttpResponse>) {
        let state = self.state.lock();
        (state.body.clone(), state.response.clone())
    }

    pub(crate) fn set_submitted_request(&self, request: ServiceRequest) {
        self.state.lock().request = Some(request);
    }

    pub(crate) fn add_metrics_handler(&self, handler: MetricsHandler) {
        self.state.lock().metrics_handlers.push(handler);
    }

    /// Record the network outcome and settle the initial result.
    ///
    /// A transport error becomes the result and is reported to the delegate,
    /// unless the validation hook raises, in which case the validation error
    /// wins and nothing is reported.
    pub(crate) fn complete(
        &self,
        body: Option<Bytes>,
        response: Option<HttpResponse>,
        error: Option<ServiceError>,
    ) {
        let request = {
            let mut state = self.state.lock();
            state.metrics.mark_response_end();
            state.body = body.clone();
            state.response = response.clone();
            state.error = error.clone();
            if let Some(err) = &error {
                state.result = ServiceResult::Failure(err.clone());
            }
            state.request.clone()
        };

        let delegate = self.delegate();
        let validation = delegate.as_ref().and_then(|delegate| {
            let ctx = ResponseContext {
                task_id: self.id,
                request: request.as_ref(),
                body: body.as_ref(),
                response: response.as_ref(),
                error: error.as_ref(),
            };
            delegate.validate_response(&ctx).err()
        });

        match (validation, error) {
            (Some(invalid), _) => {
                let invalid = ServiceError::validation(invalid);
                debug!(task_id = %self.id, error = %invalid, "Response failed validation");
                self.set_result(ServiceResult::Failure(invalid));
            }
            (None, Some(err)) => {
                debug!(task_id = %self.id, error = %err, "Network task failed");
                if let Some(delegate) = &delegate {
                    delegate.service_result_failure(self.id, response.as_ref(), &err);
                }
            }
            (None, None) => {
                debug!(
                    task_id = %self.id,
                    status = response.as_ref().map(|r| r.status.as_u16()),
                    "Network task completed"
                );
            }
        }
    }

    /// Decoded response body, decoded on first use and cached afterwards.
    pub(crate) fn json(&self) -> Result<Arc<Value>, ServiceError> {
        let body = {
            let state = self.state.lock();
            if let Some(json) = &state.json {
                return Ok(json.clone());
            }
            match &state.body {
                Some(body) if !body.is_empty() => body.clone(),
                _ => return Err(ServiceError::MissingBody),
            }
        };

        self.update_metrics(ServiceTaskMetrics::mark_response_json_start);
        let decoded = serde_json::from_slice::<Value>(&body);
        self.update_metrics(ServiceTaskMetrics::mark_response_json_end);

        let json = Arc::new(decoded?);
        self.state.lock().json = Some(json.clone());
        Ok(json)
    }

    /// Run `job` on the UI context, bracketed by delegate notifications and
    /// UI timing metrics.
    pub(crate) fn update_ui(&self, job: UiJob) {
        let delegate = self.delegate();
        if let Some(delegate) = &delegate {
            delegate.will_begin_update_ui(self.id);
        }
        self.update_metrics(ServiceTaskMetrics::mark_update_ui_start);
        let _finish = UiUpdateFinish {
            core: self,
            delegate,
        };
        self.ui.dispatch_sync(job);
    }

    pub(crate) fn dispatch_ui(&self, job: UiJob) {
        self.ui.dispatch_sync(job);
    }

    /// Hand the final metrics to the delegate and every registered callback.
    pub(crate) fn deliver_metrics(&self) {
        let (metrics, request, response, handlers) = {
            let mut state = self.state.lock();
            (
                state.metrics.clone(),
                state.request.clone(),
                state.response.clone(),
                std::mem::take(&mut state.metrics_handlers),
            )
        };

        debug!(task_id = %self.id, callbacks = handlers.len(), "Delivering metrics");
        if let Some(delegate) = self.delegate() {
            delegate.did_finish_collecting_metrics(
                self.id,
                &metrics,
                request.as_ref(),
                response.as_ref(),
            );
        }
        for handler in handlers {
            handler(&metrics, response.as_ref());
        }
    }
}

/// Closes a UI update even when the job unwinds.
struct UiUpdateFinish<'a> {
    core: &'a TaskCore,
    delegate: Option<Arc<dyn ServiceTaskDelegate>>,
}

impl Drop for UiUpdateFinish<'_> {
    fn drop(&mut self) {
        self.core.update_metrics(ServiceTaskMetrics::mark_update_ui_end);
        if let Some(delegate) = &self.delegate {
            delegate.did_finish_update_ui(self.core.id);
        }
    }
}
