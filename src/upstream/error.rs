//! Error types for upstream calls.

use reqwest::StatusCode;
use thiserror::Error;

use crate::resilience::LimiterError;

/// Network-level failure talking to the upstream.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the request timeout.
    #[error("request timed out")]
    Timeout,

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other failure sending the request or reading the response.
    #[error("request failed: {0}")]
    Request(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Timeout
        } else if err.is_connect() {
            TransportError::Connect(err.to_string())
        } else {
            TransportError::Request(err.to_string())
        }
    }
}

/// Errors returned by `dispatch` and the calls built on it.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// The endpoint's circuit is open; the call was never attempted.
    #[error("circuit open for endpoint {target}")]
    CircuitOpen { target: String },

    #[error("transport error calling endpoint {target}: {source}")]
    Transport {
        target: String,
        source: TransportError,
    },

    /// The upstream answered with a non-2xx status.
    #[error("upstream returned {status} for endpoint {target}: {message}")]
    Upstream {
        target: String,
        status: StatusCode,
        message: String,
    },

    /// Rejected before reaching the breaker.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The limiter was reset while the call was queued.
    #[error("call cancelled: concurrency limiter was reset")]
    LimiterClosed,

    /// A 2xx body was not the JSON shape expected.
    #[error("unexpected upstream payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl UpstreamError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            UpstreamError::CircuitOpen { .. } => "circuit_open",
            UpstreamError::Transport { .. } => "transport_error",
            UpstreamError::Upstream { .. } => "upstream_error",
            UpstreamError::InvalidRequest(_) => "invalid_request",
            UpstreamError::LimiterClosed => "limiter_closed",
            UpstreamError::Payload(_) => "payload_error",
        }
    }

    /// Whether the breaker counted this error as a failure.
    pub fn is_breaker_failure(&self) -> bool {
        matches!(
            self,
            UpstreamError::Transport { .. } | UpstreamError::Upstream { .. }
        )
    }

    /// HTTP status of an upstream error response.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            UpstreamError::Upstream { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<LimiterError> for UpstreamError {
    fn from(err: LimiterError) -> Self {
        match err {
            LimiterError::Closed => UpstreamError::LimiterClosed,
        }
    }
}
