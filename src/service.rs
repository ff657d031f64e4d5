//! Front door creating service tasks against one API
//!
//! A [`WebService`] owns the pieces every task of an API shares: a base URL,
//! default headers, the network provider, and optionally a delegate and a UI
//! dispatcher.
//!
//! ```rust,ignore
//! let service = WebService::new("https://api.example.com/v1/", provider)?
//!     .with_delegate(&delegate)
//!     .set_default_header("Accept", "application/json");
//!
//! service
//!     .get("zip/15217")?
//!     .response_json(|json, _| Ok(ServiceResult::from_value(json.clone())))
//!     .resume();
//! ```

use reqwest::{Method, Url};
use std::sync::{Arc, Weak};

use crate::config::Config;
use crate::delegate::ServiceTaskDelegate;
use crate::error::ServiceError;
use crate::network::NetworkProvider;
use crate::network::http::ReqwestProvider;
use crate::observability::TracingDelegate;
use crate::request::{HeadersMap, ServiceRequest};
use crate::task::{ServiceTask, TaskOptions};
use crate::ui::{InlineDispatcher, UiDispatcher};

#[derive(Clone)]
pub struct WebService {
    base_url: Option<Url>,
    default_headers: HeadersMap,
    network: Arc<dyn NetworkProvider>,
    delegate: Option<Weak<dyn ServiceTaskDelegate>>,
    ui: Arc<dyn UiDispatcher>,
    // Keeps a delegate created by `from_config` alive; tasks only hold it weakly.
    owned_delegate: Option<Arc<dyn ServiceTaskDelegate>>,
}

impl WebService {
    /// Create a service resolving relative paths against `base_url`.
    pub fn new(base_url: &str, network: Arc<dyn NetworkProvider>) -> Result<Self, ServiceError> {
        let mut service = Self::without_base(network);
        service.base_url = Some(Url::parse(base_url)?);
        Ok(service)
    }

    /// Create a service that only accepts absolute URLs.
    pub fn without_base(network: Arc<dyn NetworkProvider>) -> Self {
        Self {
            base_url: None,
            default_headers: HeadersMap::new(),
            network,
            delegate: None,
            ui: Arc::new(InlineDispatcher),
            owned_delegate: None,
        }
    }

    /// Build a service with the reqwest provider from a validated configuration.
    ///
    /// Must be called inside a tokio runtime. Installs a [`TracingDelegate`]
    /// honouring `reject_http_errors`.
    pub fn from_config(config: &Config) -> Result<Self, ServiceError> {
        let provider = Arc::new(ReqwestProvider::new(config.http.to_http_config())?);
        let mut service = match &config.service.base_url {
            Some(base) => Self::new(base, provider)?,
            None => Self::without_base(provider),
        };
        for (name, value) in &config.service.default_headers {
            service = service.set_default_header(name.clone(), value.clone());
        }

        let delegate = Arc::new(
            TracingDelegate::new().rejecting_http_errors(config.service.reject_http_errors),
        );
        service = service.with_delegate(&delegate);
        service.owned_delegate = Some(delegate);
        Ok(service)
    }

    /// Observe every task created from now on through `delegate`, held weakly.
    pub fn with_delegate<D: ServiceTaskDelegate + 'static>(mut self, delegate: &Arc<D>) -> Self {
        self.delegate = Some(Arc::downgrade(delegate) as Weak<dyn ServiceTaskDelegate>);
        self.owned_delegate = None;
        self
    }

    pub fn with_ui_dispatcher(mut self, ui: Arc<dyn UiDispatcher>) -> Self {
        self.ui = ui;
        self
    }

    pub fn set_default_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.default_headers.insert(name, value.into());
        self
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn default_headers(&self) -> &HeadersMap {
        &self.default_headers
    }

    /// The delegate installed by [`from_config`](Self::from_config), if any.
    pub fn owned_delegate(&self) -> Option<&Arc<dyn ServiceTaskDelegate>> {
        self.owned_delegate.as_ref()
    }

    /// Resolve `path` against the base URL. Absolute URLs pass through.
    pub fn resolve(&self, path: &str) -> Result<Url, ServiceError> {
        match Url::parse(path) {
            Ok(url) => Ok(url),
            Err(url::ParseError::RelativeUrlWithoutBase) => match &self.base_url {
                Some(base) => Ok(base.join(path)?),
                None => Err(ServiceError::InvalidUrl(format!(
                    "relative path '{}' with no base URL",
                    path
                ))),
            },
            Err(e) => Err(e.into()),
        }
    }

    /// Create an idle task for `method` and `path` with the default headers applied.
    pub fn request(&self, method: Method, path: &str) -> Result<ServiceTask, ServiceError> {
        let mut request = ServiceRequest::new(method, self.resolve(path)?);
        request.extend_headers(self.default_headers.clone());

        let options = TaskOptions {
            delegate: self.delegate.clone(),
            ui: self.ui.clone(),
        };
        Ok(ServiceTask::with_options(
            request,
            self.network.clone(),
            options,
        ))
    }

    pub fn get(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::DELETE, path)
    }

    pub fn head(&self, path: &str) -> Result<ServiceTask, ServiceError> {
        self.request(Method::HEAD, path)
    }
}
