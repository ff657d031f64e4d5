//! Network task capability
//!
//! The core never talks to a socket. It asks a [`NetworkProvider`] for a
//! [`NetworkTask`] handle and receives exactly one completion callback with
//! `(body, response, error)`.
//!
//! - [`http::ReqwestProvider`] - production provider on top of reqwest
//! - [`mock::MockNetwork`] - scripted provider for tests and demos

pub mod http;
pub mod mock;

use bytes::Bytes;
use reqwest::header::HeaderMap;
use reqwest::{StatusCode, Url};

use crate::error::ServiceError;
use crate::request::ServiceRequest;

/// Callback invoked once per handle, from any thread.
pub type CompletionHandler =
    Box<dyn FnOnce(Option<Bytes>, Option<HttpResponse>, Option<ServiceError>) + Send + 'static>;

/// Response metadata reported by the transport.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub url: Url,
    pub status: StatusCode,
    pub headers: HeaderMap,
}

impl HttpResponse {
    pub fn new(url: Url, status: StatusCode) -> Self {
        Self {
            url,
            status,
            headers: HeaderMap::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetworkTaskState {
    Running,
    Suspended,
    Canceling,
    Completed,
}

/// Handle over an in-flight network operation.
pub trait NetworkTask: Send {
    fn resume(&mut self);

    fn suspend(&mut self);

    /// Cancel the operation. No completion callback fires afterwards.
    fn cancel(&mut self);

    fn state(&self) -> NetworkTaskState;
}

/// Creates network task handles for finished requests.
pub trait NetworkProvider: Send + Sync {
    /// Create a suspended handle for `request`. `completion` must be invoked
    /// at most once, after the handle has been resumed.
    fn data_task(
        &self,
        request: &ServiceRequest,
        completion: CompletionHandler,
    ) -> Box<dyn NetworkTask>;
}
