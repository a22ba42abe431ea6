//! Request dispatcher.
//!
//! # Responsibilities
//! - Build the request URL and headers for an upstream call
//! - Consult the circuit breaker before any I/O
//! - Run the transport call inside a limiter slot
//! - Report the outcome back to the breaker
//!
//! # Data Flow
//! ```text
//! dispatch(target, method, path, options)
//!     → build_api_url + query      (InvalidRequest on a bad URL)
//!     → breaker.allow(target)      (CircuitOpen, no slot taken)
//!     → limiter.run(transport.send)
//!     → 2xx: record_success | transport error / non-2xx: record_failure
//! ```
//!
//! # Design Decisions
//! - No internal retry; the breaker is the defense against repeated failure
//! - Non-2xx responses count as breaker failures, including 4xx
//! - Error bodies are truncated before they are attached to an error

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

use crate::observability::metrics;
use crate::resilience::{CircuitBreaker, ConcurrencyLimiter};
use crate::upstream::error::UpstreamError;
use crate::upstream::transport::{Transport, UpstreamRequest, UpstreamResponse};

pub const API_KEY_HEADER: HeaderName = HeaderName::from_static("x-api-key");
pub const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Longest upstream error body kept in an `UpstreamError` message.
const MAX_ERROR_MESSAGE_CHARS: usize = 512;

/// Join a base URL and a path with exactly one `/` between them.
pub fn build_api_url(base: &str, path: &str) -> String {
    let base = base.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    format!("{base}/{path}")
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ApiKeyError {
    #[error("API key is empty")]
    Empty,
    #[error("API key contains characters not allowed in a header")]
    InvalidCharacters,
}

/// Upstream API key, stored as a sensitive header value.
#[derive(Clone)]
pub struct ApiKey(HeaderValue);

impl ApiKey {
    pub fn new(key: impl AsRef<str>) -> Result<Self, ApiKeyError> {
        let key = key.as_ref().trim();
        if key.is_empty() {
            return Err(ApiKeyError::Empty);
        }
        let mut value = HeaderValue::from_str(key).map_err(|_| ApiKeyError::InvalidCharacters)?;
        value.set_sensitive(true);
        Ok(Self(value))
    }

    pub fn header_value(&self) -> &HeaderValue {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(<redacted>)")
    }
}

/// Headers every upstream call carries.
pub fn build_headers(api_key: &ApiKey, has_body: bool) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(API_KEY_HEADER, api_key.header_value().clone());
    if has_body {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    headers
}

/// Per-call options for `dispatch`.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Extra headers; the API key and content type always win.
    pub headers: HeaderMap,
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Serialize `body` as the JSON request body.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, serde_json::Error> {
        self.body = Some(serde_json::to_vec(body)?);
        Ok(self)
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Composes breaker, limiter and transport for every upstream call.
pub struct Dispatcher<T> {
    base_url: String,
    api_key: ApiKey,
    transport: T,
    breaker: Arc<CircuitBreaker>,
    limiter: Arc<ConcurrencyLimiter>,
}

impl<T> fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .finish_non_exhaustive()
    }
}

impl<T: Transport> Dispatcher<T> {
    pub fn new(
        base_url: impl Into<String>,
        api_key: ApiKey,
        transport: T,
        breaker: Arc<CircuitBreaker>,
        limiter: Arc<ConcurrencyLimiter>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            transport,
            breaker,
            limiter,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform one call against `target`.
    pub async fn dispatch(
        &self,
        target: &str,
        method: Method,
        path: &str,
        options: RequestOptions,
    ) -> Result<UpstreamResponse, UpstreamError> {
        let url = self.request_url(path, &options.query)?;
        let request_id = Uuid::new_v4();

        let mut headers = options.headers;
        for (name, value) in &build_headers(&self.api_key, options.body.is_some()) {
            headers.insert(name.clone(), value.clone());
        }
        let request_id_value = HeaderValue::try_from(request_id.to_string())
            .map_err(|e| UpstreamError::InvalidRequest(e.to_string()))?;
        headers.insert(REQUEST_ID_HEADER, request_id_value);

        if !self.breaker.allow(target) {
            metrics::record_circuit_rejection(target);
            return Err(UpstreamError::CircuitOpen {
                target: target.to_string(),
            });
        }

        tracing::debug!(
            endpoint = %target,
            method = %method,
            path = %url.path(),
            request_id = %request_id,
            "Dispatching upstream call"
        );

        let request = UpstreamRequest {
            method,
            url,
            headers,
            body: options.body,
            timeout: options.timeout,
        };

        let start = Instant::now();
        let result = self.limiter.run(self.transport.send(request)).await?;

        match result {
            Ok(response) if response.is_success() => {
                self.breaker.record_success(target);
                metrics::record_request(target, "success", start);
                Ok(response)
            }
            Ok(response) => {
                self.breaker.record_failure(target);
                metrics::record_request(target, "upstream_error", start);
                tracing::warn!(
                    endpoint = %target,
                    status = response.status.as_u16(),
                    request_id = %request_id,
                    "Upstream returned error status"
                );
                Err(UpstreamError::Upstream {
                    target: target.to_string(),
                    status: response.status,
                    message: error_message(&response),
                })
            }
            Err(source) => {
                self.breaker.record_failure(target);
                metrics::record_request(target, "transport_error", start);
                tracing::warn!(
                    endpoint = %target,
                    error = %source,
                    request_id = %request_id,
                    "Upstream call failed"
                );
                Err(UpstreamError::Transport {
                    target: target.to_string(),
                    source,
                })
            }
        }
    }

    fn request_url(&self, path: &str, query: &[(String, String)]) -> Result<Url, UpstreamError> {
        let raw = build_api_url(&self.base_url, path);
        let mut url = Url::parse(&raw)
            .map_err(|e| UpstreamError::InvalidRequest(format!("invalid upstream URL '{raw}': {e}")))?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        Ok(url)
    }
}

fn error_message(response: &UpstreamResponse) -> String {
    let text = response.text();
    let text = text.trim();
    if text.is_empty() {
        return response
            .status
            .canonical_reason()
            .unwrap_or("unknown status")
            .to_string();
    }
    if text.chars().count() > MAX_ERROR_MESSAGE_CHARS {
        let truncated: String = text.chars().take(MAX_ERROR_MESSAGE_CHARS).collect();
        format!("{truncated}...")
    } else {
        text.to_string()
    }
}
