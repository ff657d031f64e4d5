//! Scripted network provider
//!
//! Replies either as soon as a handle is resumed or when the owner calls
//! [`MockNetwork::release_pending`], which lets tests observe a task while its
//! request is still "on the wire".

use bytes::Bytes;
use parking_lot::Mutex;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use super::{CompletionHandler, HttpResponse, NetworkProvider, NetworkTask, NetworkTaskState};
use crate::error::{ServiceError, TransportError};
use crate::request::ServiceRequest;

/// Reply delivered to every handle created by a [`MockNetwork`].
#[derive(Debug, Clone)]
pub struct MockReply {
    pub status: StatusCode,
    pub body: Option<Bytes>,
    pub error: Option<String>,
}

impl MockReply {
    pub fn json(value: &Value) -> Self {
        Self {
            status: StatusCode::OK,
            body: Some(Bytes::from(value.to_string())),
            error: None,
        }
    }

    pub fn body(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: Some(body.into()),
            error: None,
        }
    }

    pub fn status(status: StatusCode) -> Self {
        Self {
            status,
            body: None,
            error: None,
        }
    }

    /// Transport failure: no body, no response.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::OK,
            body: None,
            error: Some(message.into()),
        }
    }

    fn deliver(self, url: reqwest::Url, completion: CompletionHandler) {
        match self.error {
            Some(message) => completion(
                None,
                None,
                Some(ServiceError::transport(TransportError::RequestFailed(message))),
            ),
            None => completion(self.body, Some(HttpResponse::new(url, self.status)), None),
        }
    }
}

type Pending = Arc<Mutex<Vec<(usize, reqwest::Url, CompletionHandler)>>>;

/// In-process provider recording every submitted request.
pub struct MockNetwork {
    reply: Mutex<MockReply>,
    deferred: bool,
    pending: Pending,
    requests: Mutex<Vec<ServiceRequest>>,
    created: AtomicUsize,
}

impl MockNetwork {
    /// Complete each handle inside its first `resume`.
    pub fn replying(reply: MockReply) -> Self {
        Self::build(reply, false)
    }

    /// Hold completions until [`release_pending`](Self::release_pending).
    pub fn deferred(reply: MockReply) -> Self {
        Self::build(reply, true)
    }

    fn build(reply: MockReply, deferred: bool) -> Self {
        Self {
            reply: Mutex::new(reply),
            deferred,
            pending: Arc::new(Mutex::new(Vec::new())),
            requests: Mutex::new(Vec::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn set_reply(&self, reply: MockReply) {
        *self.reply.lock() = reply;
    }

    /// Deliver the current reply to every resumed, deferred handle.
    /// Returns how many completions fired.
    pub fn release_pending(&self) -> usize {
        let pending: Vec<_> = self.pending.lock().drain(..).collect();
        let reply = self.reply.lock().clone();
        let count = pending.len();
        for (_, url, completion) in pending {
            reply.clone().deliver(url, completion);
        }
        count
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Number of handles created so far.
    pub fn task_count(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ServiceRequest> {
        self.requests.lock().last().cloned()
    }
}

impl NetworkProvider for MockNetwork {
    fn data_task(
        &self,
        request: &ServiceRequest,
        completion: CompletionHandler,
    ) -> Box<dyn NetworkTask> {
        let id = self.created.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().push(request.clone());
        tracing::debug!(url = %request.url, "Mock data task created");

        Box::new(MockTask {
            id,
            url: request.url.clone(),
            reply: self.reply.lock().clone(),
            completion: Some(completion),
            pending: self.deferred.then(|| self.pending.clone()),
            state: NetworkTaskState::Suspended,
        })
    }
}

struct MockTask {
    id: usize,
    url: reqwest::Url,
    reply: MockReply,
    completion: Option<CompletionHandler>,
    pending: Option<Pending>,
    state: NetworkTaskState,
}

impl NetworkTask for MockTask {
    fn resume(&mut self) {
        if matches!(
            self.state,
            NetworkTaskState::Canceling | NetworkTaskState::Completed
        ) {
            return;
        }
        self.state = NetworkTaskState::Running;

        let Some(completion) = self.completion.take() else {
            return;
        };
        match &self.pending {
            Some(pending) => pending.lock().push((self.id, self.url.clone(), completion)),
            None => {
                self.state = NetworkTaskState::Completed;
                self.reply.clone().deliver(self.url.clone(), completion);
            }
        }
    }

    fn suspend(&mut self) {
        if self.state == NetworkTaskState::Running {
            self.state = NetworkTaskState::Suspended;
        }
    }

    fn cancel(&mut self) {
        self.completion = None;
        if let Some(pending) = &self.pending {
            pending.lock().retain(|(id, _, _)| *id != self.id);
        }
        self.state = NetworkTaskState::Canceling;
    }

    fn state(&self) -> NetworkTaskState {
        self.state
    }
}
