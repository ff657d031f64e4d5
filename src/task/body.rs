//! Request bodies produced after `resume`

use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error};

use super::{ServiceTask, TaskInner, TaskState};
use crate::error::{BoxError, ServiceError};

pub type BodyResult = Result<Bytes, BoxError>;

/// Handed to a body provider; call it exactly once with the produced body.
pub type BodyCallback = Box<dyn FnOnce(BodyResult) + Send + 'static>;

pub(crate) type BodyProvider = Box<dyn FnOnce(BodyCallback) + Send + 'static>;

impl ServiceTask {
    /// Produce the request body asynchronously when the task is first resumed.
    ///
    /// The network handle is created once `provider` reports a body. A failure
    /// completes the task with [`ServiceError::Body`] without touching the
    /// network.
    pub fn set_body_async<F>(&self, provider: F) -> &Self
    where
        F: FnOnce(BodyCallback) + Send + 'static,
    {
        self.configure("set_body_async", |c| {
            c.body_provider = Some(Box::new(provider))
        })
    }

    /// Like [`set_body_async`](Self::set_body_async), computing the body on a
    /// background thread.
    pub fn set_body_background<F>(&self, compute: F) -> &Self
    where
        F: FnOnce() -> BodyResult + Send + 'static,
    {
        self.set_body_async(move |done| run_in_background(compute, done))
    }
}

fn run_in_background<F>(compute: F, done: BodyCallback)
where
    F: FnOnce() -> BodyResult + Send + 'static,
{
    let slot = Arc::new(Mutex::new(Some(done)));
    let worker_slot = slot.clone();
    let spawned = std::thread::Builder::new()
        .name("service-body".to_string())
        .spawn(move || {
            let body = compute();
            if let Some(done) = worker_slot.lock().take() {
                done(body);
            }
        });

    if let Err(e) = spawned {
        error!(error = %e, "Failed to start body worker");
        if let Some(done) = slot.lock().take() {
            done(Err(Box::new(e)));
        }
    }
}

impl TaskInner {
    pub(super) fn body_callback(self: &Arc<Self>) -> BodyCallback {
        let task = self.clone();
        Box::new(move |outcome| task.body_ready(outcome))
    }

    fn body_ready(self: &Arc<Self>, outcome: BodyResult) {
        let mut control = self.control.lock();
        control.body_pending = false;
        if self.state() == TaskState::Cancelled {
            debug!(task_id = %self.core.id, "Body ready after cancel, ignored");
            return;
        }

        match outcome {
            Ok(body) => {
                debug!(task_id = %self.core.id, bytes = body.len(), "Request body ready");
                control.request.body = Some(body);
                self.start_network(control);
            }
            Err(e) => {
                control.finished = true;
                drop(control);
                self.finish(None, None, Some(ServiceError::body(e)));
            }
        }
    }
}
