//! reqwest-backed network provider

use bytes::Bytes;
use reqwest::header::{CACHE_CONTROL, COOKIE, HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Request};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{CompletionHandler, HttpResponse, NetworkProvider, NetworkTask, NetworkTaskState};
use crate::error::{ServiceError, TransportError};
use crate::humanize::ByteSize;
use crate::request::ServiceRequest;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
    pub user_agent: String,
    pub max_redirects: usize,
    pub max_response_bytes: ByteSize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(60),
            user_agent: concat!("servicetask/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 10,
            max_response_bytes: ByteSize(10 * 1024 * 1024),
        }
    }
}

/// Provider submitting requests through a shared reqwest [`Client`].
///
/// Transfers run on the tokio runtime captured at construction.
#[derive(Clone)]
pub struct ReqwestProvider {
    client: Client,
    runtime: Handle,
    config: HttpConfig,
}

impl ReqwestProvider {
    /// Create a provider bound to the current tokio runtime.
    pub fn new(config: HttpConfig) -> Result<Self, ServiceError> {
        let runtime = Handle::try_current().map_err(|e| {
            ServiceError::transport(TransportError::InvalidRequest(format!(
                "no tokio runtime available: {}",
                e
            )))
        })?;
        Self::with_runtime(config, runtime)
    }

    pub fn with_runtime(config: HttpConfig, runtime: Handle) -> Result<Self, ServiceError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| ServiceError::transport(TransportError::RequestFailed(e.to_string())))?;

        Ok(Self {
            client,
            runtime,
            config,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    /// Translate a descriptor into a reqwest request.
    pub fn build_request(&self, request: &ServiceRequest) -> Result<Request, TransportError> {
        let mut built = self
            .client
            .request(request.method.clone(), request.url.clone());

        // `insert` replaces, so names differing only in case collapse to one.
        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| TransportError::InvalidRequest(format!("header {}: {}", name, e)))?;
            headers.insert(name, value);
        }
        built = built.headers(headers);

        if let Some(directive) = request.cache_policy.cache_control() {
            built = built.header(CACHE_CONTROL, directive);
        }
        if let Some(timeout) = request.timeout {
            built = built.timeout(timeout);
        }
        if let Some(body) = &request.body {
            built = built.body(body.clone());
        }

        let mut built = built
            .build()
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        if !request.handle_cookies {
            built.headers_mut().remove(COOKIE);
        }

        Ok(built)
    }
}

impl NetworkProvider for ReqwestProvider {
    fn data_task(
        &self,
        request: &ServiceRequest,
        completion: CompletionHandler,
    ) -> Box<dyn NetworkTask> {
        Box::new(HttpTask {
            provider: self.clone(),
            pending: Some((self.build_request(request), completion)),
            join: None,
            state: NetworkTaskState::Suspended,
        })
    }
}

type PendingRequest = (Result<Request, TransportError>, CompletionHandler);

struct HttpTask {
    provider: ReqwestProvider,
    pending: Option<PendingRequest>,
    join: Option<JoinHandle<()>>,
    state: NetworkTaskState,
}

impl NetworkTask for HttpTask {
    fn resume(&mut self) {
        let Some((request, completion)) = self.pending.take() else {
            return;
        };
        self.state = NetworkTaskState::Running;

        let client = self.provider.client.clone();
        let limit = self.provider.config.max_response_bytes;
        self.join = Some(self.provider.runtime.spawn(async move {
            match request {
                Ok(request) => {
                    let (body, response, error) = execute(client, request, limit).await;
                    completion(body, response, error.map(ServiceError::transport));
                }
                Err(e) => completion(None, None, Some(ServiceError::transport(e))),
            }
        }));
    }

    /// Defers a request that has not been sent yet. A transfer already in
    /// flight cannot be paused.
    fn suspend(&mut self) {
        if self.pending.is_some() {
            self.state = NetworkTaskState::Suspended;
        } else {
            debug!("Suspend ignored for in-flight HTTP transfer");
        }
    }

    fn cancel(&mut self) {
        self.pending = None;
        if let Some(join) = self.join.take() {
            join.abort();
        }
        self.state = NetworkTaskState::Canceling;
    }

    fn state(&self) -> NetworkTaskState {
        match &self.join {
            Some(join) if join.is_finished() => NetworkTaskState::Completed,
            _ => self.state,
        }
    }
}

async fn execute(
    client: Client,
    request: Request,
    limit: ByteSize,
) -> (Option<Bytes>, Option<HttpResponse>, Option<TransportError>) {
    let url = request.url().clone();
    debug!(%url, method = %request.method(), "Starting request");

    let response = match client.execute(request).await {
        Ok(response) => response,
        Err(e) => {
            let error = if e.is_timeout() {
                TransportError::Timeout
            } else if e.is_redirect() {
                TransportError::TooManyRedirects
            } else {
                TransportError::RequestFailed(e.to_string())
            };
            warn!(%url, error = %error, "Request failed");
            return (None, None, Some(error));
        }
    };

    let meta = HttpResponse {
        url: response.url().clone(),
        status: response.status(),
        headers: response.headers().clone(),
    };

    if let Some(length) = response.content_length() {
        if length > limit.as_u64() {
            return (
                None,
                Some(meta),
                Some(TransportError::BodyTooLarge {
                    limit: limit.as_u64(),
                    actual: length,
                }),
            );
        }
    }

    match response.bytes().await {
        Ok(bytes) if bytes.len() as u64 > limit.as_u64() => (
            None,
            Some(meta),
            Some(TransportError::BodyTooLarge {
                limit: limit.as_u64(),
                actual: bytes.len() as u64,
            }),
        ),
        Ok(bytes) => {
            debug!(
                %url,
                status = meta.status.as_u16(),
                size = %ByteSize(bytes.len() as u64),
                "Request completed"
            );
            (Some(bytes), Some(meta), None)
        }
        Err(e) => (
            None,
            Some(meta),
            Some(TransportError::RequestFailed(format!(
                "Failed to read body: {}",
                e
            ))),
        ),
    }
}
