//! Service task: one HTTP request plus the ordered chain of stages that
//! interpret its outcome.
//!
//! A task is configured, resumed, and then observed through stages registered
//! with the chaining methods in [`handlers`]. Stages are queued on a
//! [`HandlerPipeline`] that stays blocked until the network completion has
//! recorded the outcome, then run strictly one after another.
//!
//! ```rust,ignore
//! let task = ServiceTask::new(request, network);
//! task.response_json(|json, _| Ok(ServiceResult::from_value(json["zip"].clone())))
//!     .update_ui(|zip| show(zip))
//!     .response_error(|err| tracing::warn!(%err, "lookup failed"))
//!     .resume();
//! ```

mod body;
mod context;
pub mod handlers;

pub use self::body::{BodyCallback, BodyResult};
pub use self::context::MetricsHandler;

use bytes::Bytes;
use parking_lot::{Mutex, MutexGuard};
use reqwest::Url;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use self::body::BodyProvider;
use self::context::TaskCore;
use crate::delegate::ServiceTaskDelegate;
use crate::error::ServiceError;
use crate::metrics::ServiceTaskMetrics;
use crate::network::{HttpResponse, NetworkProvider, NetworkTask, NetworkTaskState};
use crate::pipeline::HandlerPipeline;
use crate::request::{CachePolicy, HeadersMap, ParameterEncoding, Parameters, ServiceRequest};
use crate::result::ServiceResult;
use crate::ui::{InlineDispatcher, UiDispatcher};

/// Lifecycle of a [`ServiceTask`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    /// Configured, never resumed.
    Idle,
    Running,
    Suspended,
    /// The network completion fired and the pipeline was released.
    Completed,
    Cancelled,
}

/// Collaborators of a task besides its network provider.
#[derive(Clone)]
pub struct TaskOptions {
    pub delegate: Option<Weak<dyn ServiceTaskDelegate>>,
    pub ui: Arc<dyn UiDispatcher>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            delegate: None,
            ui: Arc::new(InlineDispatcher),
        }
    }
}

impl TaskOptions {
    /// Observe the task through `delegate`, held weakly.
    pub fn with_delegate<D: ServiceTaskDelegate + 'static>(mut self, delegate: &Arc<D>) -> Self {
        self.delegate = Some(Arc::downgrade(delegate) as Weak<dyn ServiceTaskDelegate>);
        self
    }

    pub fn with_ui(mut self, ui: Arc<dyn UiDispatcher>) -> Self {
        self.ui = ui;
        self
    }
}

/// Handle to a service task. Clones share the same task.
#[derive(Clone)]
pub struct ServiceTask {
    inner: Arc<TaskInner>,
}

struct TaskInner {
    core: Arc<TaskCore>,
    pipeline: HandlerPipeline<TaskCore>,
    network: Arc<dyn NetworkProvider>,
    // Lock order: `control` before `lifecycle`. Handles are resumed with
    // `control` unlocked, since providers may complete inside `resume`.
    control: Mutex<Control>,
    lifecycle: Mutex<TaskState>,
}

struct Control {
    request: ServiceRequest,
    body_provider: Option<BodyProvider>,
    body_pending: bool,
    handle: Option<Box<dyn NetworkTask>>,
    /// Set once a network handle has been requested. The handle itself is
    /// briefly out of `handle` while it is being resumed.
    submitted: bool,
    /// Completed without ever reaching the network.
    finished: bool,
    has_suspended: bool,
    metrics_scheduled: bool,
}

impl Control {
    fn is_locked(&self) -> bool {
        self.submitted || self.body_pending || self.finished
    }
}

impl ServiceTask {
    pub fn new(request: ServiceRequest, network: Arc<dyn NetworkProvider>) -> Self {
        Self::with_options(request, network, TaskOptions::default())
    }

    pub fn with_options(
        request: ServiceRequest,
        network: Arc<dyn NetworkProvider>,
        options: TaskOptions,
    ) -> Self {
        let id = Uuid::new_v4();
        let core = Arc::new(TaskCore::new(id, options.delegate, options.ui));
        let pipeline = HandlerPipeline::new(id.to_string(), core.clone());
        debug!(task_id = %id, method = %request.method, url = %request.url, "Service task created");

        Self {
            inner: Arc::new(TaskInner {
                core,
                pipeline,
                network,
                control: Mutex::new(Control {
                    request,
                    body_provider: None,
                    body_pending: false,
                    handle: None,
                    submitted: false,
                    finished: false,
                    has_suspended: false,
                    metrics_scheduled: false,
                }),
                lifecycle: Mutex::new(TaskState::Idle),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.core.id
    }

    pub fn state(&self) -> TaskState {
        self.inner.state()
    }

    pub fn url(&self) -> Url {
        self.inner.control.lock().request.url.clone()
    }

    /// Snapshot of the request as currently configured.
    pub fn request(&self) -> ServiceRequest {
        self.inner.control.lock().request.clone()
    }

    /// State of the underlying network handle, once it exists.
    pub fn network_state(&self) -> Option<NetworkTaskState> {
        self.inner.control.lock().handle.as_ref().map(|h| h.state())
    }

    pub fn metrics(&self) -> ServiceTaskMetrics {
        self.inner.core.metrics()
    }

    /// Snapshot of the current result. Stages still running may replace it.
    pub fn result(&self) -> ServiceResult {
        self.inner.core.result()
    }

    // ---- request configuration ----

    fn try_configure<R>(
        &self,
        op: &'static str,
        configure: impl FnOnce(&mut Control) -> R,
    ) -> Result<R, ServiceError> {
        let mut control = self.inner.control.lock();
        if control.is_locked() {
            warn!(task_id = %self.id(), op, "Request is locked, configuration ignored");
            return Err(ServiceError::RequestLocked);
        }
        Ok(configure(&mut control))
    }

    fn configure(&self, op: &'static str, configure: impl FnOnce(&mut Control)) -> &Self {
        let _ = self.try_configure(op, configure);
        self
    }

    pub fn set_header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let (name, value) = (name.into(), value.into());
        self.configure("set_header", |c| c.request.set_header(name, value))
    }

    pub fn set_headers(&self, headers: HeadersMap) -> &Self {
        self.configure("set_headers", |c| c.request.extend_headers(headers))
    }

    pub fn set_parameters(
        &self,
        parameters: &Parameters,
        encoding: ParameterEncoding,
    ) -> Result<&Self, ServiceError> {
        self.try_configure("set_parameters", |c| {
            c.request.set_parameters(parameters, encoding)
        })??;
        Ok(self)
    }

    /// Use `body` as the request body, replacing any body provider.
    pub fn set_body(&self, body: impl Into<Bytes>) -> &Self {
        let body = body.into();
        self.configure("set_body", |c| {
            c.request.body = Some(body);
            c.body_provider = None;
        })
    }

    pub fn set_json_body<T: Serialize + ?Sized>(&self, value: &T) -> Result<&Self, ServiceError> {
        self.try_configure("set_json_body", |c| {
            c.body_provider = None;
            c.request.set_json_body(value)
        })??;
        Ok(self)
    }

    pub fn set_cache_policy(&self, policy: CachePolicy) -> &Self {
        self.configure("set_cache_policy", |c| c.request.cache_policy = policy)
    }

    pub fn set_handle_cookies(&self, handle_cookies: bool) -> &Self {
        self.configure("set_handle_cookies", |c| {
            c.request.handle_cookies = handle_cookies
        })
    }

    pub fn set_timeout(&self, timeout: Duration) -> &Self {
        self.configure("set_timeout", |c| c.request.timeout = Some(timeout))
    }

    // ---- lifecycle ----

    /// Start or continue the request.
    ///
    /// The first resume of a task that was never suspended also schedules
    /// metrics delivery, behind every stage registered so far.
    pub fn resume(&self) -> &Self {
        let inner = &self.inner;
        if inner.state() == TaskState::Cancelled {
            debug!(task_id = %self.id(), "Resume ignored, task cancelled");
            return self;
        }

        let provider = {
            let mut control = inner.control.lock();
            inner.core.update_metrics(ServiceTaskMetrics::mark_fetch_start);

            if !control.has_suspended && !control.metrics_scheduled {
                control.metrics_scheduled = true;
                inner
                    .pipeline
                    .push(Box::new(|core: &TaskCore| core.deliver_metrics()));
            }
            inner.mark_running();

            if let Some(handle) = control.handle.take() {
                inner.resume_handle(&mut control, handle);
                return self;
            }
            if control.is_locked() {
                return self;
            }
            let provider = control.body_provider.take();
            match provider {
                Some(provider) => {
                    control.body_pending = true;
                    provider
                }
                None => {
                    inner.start_network(control);
                    return self;
                }
            }
        };

        debug!(task_id = %self.id(), "Waiting for request body");
        provider(inner.body_callback());
        self
    }

    pub fn suspend(&self) -> &Self {
        let mut control = self.inner.control.lock();
        control.has_suspended = true;
        if let Some(handle) = control.handle.as_mut() {
            handle.suspend();
        }
        let mut state = self.inner.lifecycle.lock();
        if *state == TaskState::Running {
            *state = TaskState::Suspended;
        }
        debug!(task_id = %self.id(), "Service task suspended");
        self
    }

    /// Cancel the request and drop every stage that has not started.
    ///
    /// No completion is processed afterwards, so no further stage runs and the
    /// delegate hears nothing more about this task.
    pub fn cancel(&self) -> &Self {
        {
            let mut control = self.inner.control.lock();
            *self.inner.lifecycle.lock() = TaskState::Cancelled;
            control.body_provider = None;
            if let Some(handle) = control.handle.as_mut() {
                handle.cancel();
            }
        }
        self.inner.pipeline.cancel();
        debug!(task_id = %self.id(), "Service task cancelled");
        self
    }
}

impl TaskInner {
    fn state(&self) -> TaskState {
        *self.lifecycle.lock()
    }

    fn mark_running(&self) {
        let mut state = self.lifecycle.lock();
        if matches!(*state, TaskState::Idle | TaskState::Suspended) {
            *state = TaskState::Running;
        }
    }

    /// Create the network handle and resume it if the task is running.
    fn start_network(self: &Arc<Self>, mut control: MutexGuard<'_, Control>) {
        let task = self.clone();
        let completion = Box::new(
            move |body: Option<Bytes>, response: Option<HttpResponse>, error: Option<ServiceError>| {
                task.finish(body, response, error)
            },
        );

        let handle = self.network.data_task(&control.request, completion);
        control.submitted = true;
        self.core.set_submitted_request(control.request.clone());
        debug!(task_id = %self.core.id, url = %control.request.url, "Network task created");

        if self.state() == TaskState::Running {
            self.resume_handle(&mut control, handle);
        } else {
            control.handle = Some(handle);
        }
    }

    /// Resume `handle` with `control` unlocked, then store it.
    ///
    /// A synchronous completion may call back into the task from inside
    /// `resume`. A suspend or cancel that lands in the meantime is applied to
    /// the handle before it is stored.
    fn resume_handle(
        &self,
        control: &mut MutexGuard<'_, Control>,
        mut handle: Box<dyn NetworkTask>,
    ) {
        MutexGuard::unlocked(control, || handle.resume());
        match self.state() {
            TaskState::Cancelled => handle.cancel(),
            TaskState::Suspended => handle.suspend(),
            _ => {}
        }
        control.handle = Some(handle);
    }

    /// Network completion. Records the outcome and releases the pipeline.
    fn finish(
        &self,
        body: Option<Bytes>,
        response: Option<HttpResponse>,
        error: Option<ServiceError>,
    ) {
        if self.state() == TaskState::Cancelled {
            debug!(task_id = %self.core.id, "Completion after cancel ignored");
            return;
        }

        self.core.complete(body, response, error);
        {
            let mut state = self.lifecycle.lock();
            if *state != TaskState::Cancelled {
                *state = TaskState::Completed;
            }
        }
        self.pipeline.release();
    }
}

impl fmt::Debug for ServiceTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceTask")
            .field("id", &self.id())
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::mock::{MockNetwork, MockReply};
    use reqwest::{Method, StatusCode};
    use serde_json::json;
    use std::sync::mpsc;

    const WAIT: Duration = Duration::from_secs(5);

    fn get(network: &Arc<MockNetwork>) -> ServiceTask {
        let url = Url::parse("https://api.example.com/zip").unwrap();
        ServiceTask::new(ServiceRequest::new(Method::GET, url), network.clone())
    }

    #[test]
    fn test_lifecycle_states() {
        let network = Arc::new(MockNetwork::deferred(MockReply::json(&json!({}))));
        let task = get(&network);
        assert_eq!(task.state(), TaskState::Idle);
        assert!(task.network_state().is_none());

        task.resume();
        assert_eq!(task.state(), TaskState::Running);
        assert_eq!(task.network_state(), Some(NetworkTaskState::Running));

        task.suspend();
        assert_eq!(task.state(), TaskState::Suspended);
        assert_eq!(task.network_state(), Some(NetworkTaskState::Suspended));

        task.resume();
        assert_eq!(network.release_pending(), 1);
        assert_eq!(task.state(), TaskState::Completed);
    }

    #[test]
    fn test_request_locked_after_resume() {
        let network = Arc::new(MockNetwork::deferred(MockReply::status(StatusCode::OK)));
        let task = get(&network);
        task.set_header("X-Before", "1").resume();
        task.set_header("X-After", "1");

        assert!(matches!(
            task.set_json_body(&json!({"a": 1})),
            Err(ServiceError::RequestLocked)
        ));

        let submitted = network.last_request().unwrap();
        assert_eq!(submitted.header("x-before"), Some("1"));
        assert!(submitted.header("x-after").is_none());
        assert!(task.request().header("x-after").is_none());
    }

    #[test]
    fn test_cancel_suppresses_completion() {
        let network = Arc::new(MockNetwork::deferred(MockReply::json(&json!({"zip": "1"}))));
        let task = get(&network);
        let (tx, rx) = mpsc::channel();
        task.response(move |_, _| {
            let _ = tx.send(());
            Ok(ServiceResult::Empty)
        });
        task.resume().cancel();

        assert_eq!(network.release_pending(), 0);
        assert_eq!(task.state(), TaskState::Cancelled);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());

        task.resume();
        assert_eq!(task.state(), TaskState::Cancelled);
        assert_eq!(network.task_count(), 1);
    }

    #[test]
    fn test_cancel_before_resume_never_creates_handle() {
        let network = Arc::new(MockNetwork::replying(MockReply::status(StatusCode::OK)));
        let task = get(&network);
        task.cancel().resume();
        assert_eq!(network.task_count(), 0);
    }

    #[test]
    fn test_metrics_delivered_once_after_completion() {
        let network = Arc::new(MockNetwork::replying(MockReply::json(&json!({}))));
        let task = get(&network);
        let (tx, rx) = mpsc::channel();
        task.metrics_collected(move |metrics, response| {
            let _ = tx.send((metrics.clone(), response.map(|r| r.status)));
        });
        task.resume();
        task.resume();

        let (metrics, status) = rx.recv_timeout(WAIT).unwrap();
        assert!(metrics.fetch_start.is_some());
        assert!(metrics.response_end.is_some());
        assert_eq!(status, Some(StatusCode::OK));
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_suspend_before_first_resume_skips_metrics_delivery() {
        let network = Arc::new(MockNetwork::replying(MockReply::json(&json!({}))));
        let task = get(&network);
        let (tx, rx) = mpsc::channel();
        task.metrics_collected(move |_, _| {
            let _ = tx.send(());
        });
        task.suspend().resume();

        assert_eq!(task.state(), TaskState::Completed);
        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }
}
