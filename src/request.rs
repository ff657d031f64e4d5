//! Request descriptor handed to the network provider

use bytes::Bytes;
use reqwest::{Method, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::ServiceError;

/// Header names are kept lowercase by [`ServiceRequest::set_header`], so
/// names differing only in case replace each other.
pub type HeadersMap = BTreeMap<String, String>;

/// Request parameters; encoded according to [`ParameterEncoding`].
pub type Parameters = BTreeMap<String, Value>;

/// How `set_parameters` encodes its map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterEncoding {
    /// Query string for GET/HEAD/DELETE, form body otherwise.
    #[default]
    Percent,
    /// JSON object body.
    Json,
}

/// Caching behaviour requested from the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    #[default]
    UseProtocolCachePolicy,
    ReloadIgnoringCache,
    ReturnCacheDataElseLoad,
    ReturnCacheDataDontLoad,
}

impl CachePolicy {
    /// `Cache-Control` directive expressing this policy, if any.
    pub fn cache_control(&self) -> Option<&'static str> {
        match self {
            CachePolicy::UseProtocolCachePolicy => None,
            CachePolicy::ReloadIgnoringCache => Some("no-cache"),
            CachePolicy::ReturnCacheDataElseLoad => Some("max-stale"),
            CachePolicy::ReturnCacheDataDontLoad => Some("only-if-cached"),
        }
    }
}

/// A finished request: everything a network provider needs to submit it.
#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeadersMap,
    pub body: Option<Bytes>,
    pub cache_policy: CachePolicy,
    pub handle_cookies: bool,
    pub timeout: Option<Duration>,
}

impl ServiceRequest {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeadersMap::new(),
            body: None,
            cache_policy: CachePolicy::default(),
            handle_cookies: true,
            timeout: None,
        }
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let mut name = name.into();
        name.make_ascii_lowercase();
        self.headers.insert(name, value.into());
    }

    pub fn extend_headers(&mut self, headers: impl IntoIterator<Item = (String, String)>) {
        for (name, value) in headers {
            self.set_header(name, value);
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Encode `parameters` into the URL query or the body.
    pub fn set_parameters(
        &mut self,
        parameters: &Parameters,
        encoding: ParameterEncoding,
    ) -> Result<(), ServiceError> {
        match encoding {
            ParameterEncoding::Percent if !self.allows_body() => {
                let mut pairs = self.url.query_pairs_mut();
                for (key, value) in parameters {
                    pairs.append_pair(key, &parameter_text(value));
                }
            }
            ParameterEncoding::Percent => {
                let mut form = url::form_urlencoded::Serializer::new(String::new());
                for (key, value) in parameters {
                    form.append_pair(key, &parameter_text(value));
                }
                self.body = Some(Bytes::from(form.finish()));
                self.set_header(
                    reqwest::header::CONTENT_TYPE.as_str(),
                    mime::APPLICATION_WWW_FORM_URLENCODED.as_ref(),
                );
            }
            ParameterEncoding::Json => self.set_json_body(parameters)?,
        }
        Ok(())
    }

    /// Serialize `value` as the JSON body and set `Content-Type`.
    pub fn set_json_body<T: Serialize + ?Sized>(&mut self, value: &T) -> Result<(), ServiceError> {
        let body = serde_json::to_vec(value).map_err(|e| ServiceError::Encoding(e.to_string()))?;
        self.body = Some(Bytes::from(body));
        self.set_header(
            reqwest::header::CONTENT_TYPE.as_str(),
            mime::APPLICATION_JSON.as_ref(),
        );
        Ok(())
    }

    fn allows_body(&self) -> bool {
        !(self.method == Method::GET || self.method == Method::HEAD || self.method == Method::DELETE)
    }
}

fn parameter_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
