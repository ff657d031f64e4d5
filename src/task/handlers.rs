//! Stage registration
//!
//! Every method appends one stage to the task's pipeline and returns the task
//! for chaining. Stages observe and replace the task's [`ServiceResult`]:
//!
//! | stage              | runs when            | effect on result        |
//! |--------------------|----------------------|-------------------------|
//! | `response`         | not a failure        | replaced                |
//! | `transform`        | holds a value        | replaced                |
//! | `response_json`    | not a failure        | replaced                |
//! | `response_decoded` | not a failure        | replaced                |
//! | `update_ui`        | holds a value        | unchanged               |
//! | `response_error`   | failure              | unchanged               |
//! | `update_error_ui`  | failure              | unchanged               |
//! | `recover`          | failure              | replaced                |
//!
//! Handlers run on the pipeline worker, never on the caller's thread, except
//! the UI stages which run on the task's UI dispatcher.

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::trace;

use super::ServiceTask;
use super::context::TaskCore;
use crate::error::{BoxError, ServiceError};
use crate::metrics::ServiceTaskMetrics;
use crate::network::HttpResponse;
use crate::pipeline::Stage;
use crate::result::{Payload, ServiceResult};

impl ServiceTask {
    fn enqueue(&self, name: &'static str, stage: Stage<TaskCore>) -> &Self {
        if !self.inner.pipeline.push(stage) {
            trace!(task_id = %self.id(), stage = name, "Stage dropped, task cancelled");
        }
        self
    }

    /// Inspect the raw body and response. Skipped once the result is a
    /// failure.
    pub fn response<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Option<&Bytes>, Option<&HttpResponse>) -> Result<ServiceResult, BoxError>
            + Send
            + 'static,
    {
        self.enqueue(
            "response",
            Box::new(move |core: &TaskCore| {
                if core.result().is_failure() {
                    return skipped(core, "response");
                }
                let (body, response) = core.response_parts();
                core.set_result(handler(body.as_ref(), response.as_ref()).into());
            }),
        )
    }

    /// Map the current value to a new result. Skipped unless the result holds
    /// a value.
    pub fn transform<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Payload) -> Result<ServiceResult, BoxError> + Send + 'static,
    {
        self.enqueue(
            "transform",
            Box::new(move |core: &TaskCore| {
                let Ok(value) = core.result().value() else {
                    return skipped(core, "transform");
                };
                core.set_result(handler(value).into());
            }),
        )
    }

    /// Decode the body as JSON and hand it to `handler`.
    ///
    /// The body is decoded at most once per task; later JSON stages reuse the
    /// same tree. An absent or empty body fails with
    /// [`ServiceError::MissingBody`].
    pub fn response_json<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&Value, Option<&HttpResponse>) -> Result<ServiceResult, BoxError>
            + Send
            + 'static,
    {
        self.enqueue(
            "response_json",
            Box::new(move |core: &TaskCore| {
                if core.result().is_failure() {
                    return skipped(core, "response_json");
                }
                let json = match core.json() {
                    Ok(json) => json,
                    Err(e) => return core.set_result(ServiceResult::Failure(e)),
                };
                let (_, response) = core.response_parts();
                core.set_result(handler(&json, response.as_ref()).into());
            }),
        )
    }

    /// Like [`response_json`](Self::response_json), deserializing the body
    /// into `T` first.
    pub fn response_decoded<T, F>(&self, handler: F) -> &Self
    where
        T: DeserializeOwned + 'static,
        F: FnOnce(T, Option<&HttpResponse>) -> Result<ServiceResult, BoxError> + Send + 'static,
    {
        self.enqueue(
            "response_decoded",
            Box::new(move |core: &TaskCore| {
                if core.result().is_failure() {
                    return skipped(core, "response_decoded");
                }
                let decoded = core
                    .json()
                    .and_then(|json| T::deserialize(json.as_ref()).map_err(ServiceError::from));
                let value = match decoded {
                    Ok(value) => value,
                    Err(e) => return core.set_result(ServiceResult::Failure(e)),
                };
                let (_, response) = core.response_parts();
                core.set_result(handler(value, response.as_ref()).into());
            }),
        )
    }

    /// Hand the current value to `handler` on the UI context and wait for it.
    ///
    /// Skipped unless the result holds a value. The delegate is told before
    /// and after, and the UI span is recorded in the task's metrics.
    pub fn update_ui<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(Payload) + Send + 'static,
    {
        self.enqueue(
            "update_ui",
            Box::new(move |core: &TaskCore| {
                let Ok(value) = core.result().value() else {
                    return skipped(core, "update_ui");
                };
                core.update_ui(Box::new(move || handler(value)));
            }),
        )
    }

    /// Observe a failure on the pipeline worker.
    pub fn response_error<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&ServiceError) + Send + 'static,
    {
        self.enqueue(
            "response_error",
            Box::new(move |core: &TaskCore| match core.result().error() {
                Some(err) => handler(err),
                None => skipped(core, "response_error"),
            }),
        )
    }

    /// Observe a failure on the UI context.
    pub fn update_error_ui<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(ServiceError) + Send + 'static,
    {
        self.enqueue(
            "update_error_ui",
            Box::new(move |core: &TaskCore| match core.result().error().cloned() {
                Some(err) => core.dispatch_ui(Box::new(move || handler(err))),
                None => skipped(core, "update_error_ui"),
            }),
        )
    }

    /// Replace a failure with whatever `handler` returns.
    pub fn recover<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(ServiceError) -> Result<ServiceResult, BoxError> + Send + 'static,
    {
        self.enqueue(
            "recover",
            Box::new(move |core: &TaskCore| match core.result().error().cloned() {
                Some(err) => core.set_result(handler(err).into()),
                None => skipped(core, "recover"),
            }),
        )
    }

    /// Receive the task's final metrics once every stage registered before the
    /// first `resume` has run.
    ///
    /// Not a stage: callbacks are collected and fired together with the
    /// delegate's metrics notification.
    pub fn metrics_collected<F>(&self, handler: F) -> &Self
    where
        F: FnOnce(&ServiceTaskMetrics, Option<&HttpResponse>) + Send + 'static,
    {
        self.inner.core.add_metrics_handler(Box::new(handler));
        self
    }
}

fn skipped(core: &TaskCore, stage: &'static str) {
    trace!(task_id = %core.id, stage, "Stage skipped");
}
