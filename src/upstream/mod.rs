//! Upstream Docker management API client.
//!
//! # Data Flow
//! ```text
//! caller (dashboard route, admin API)
//!     → client.rs (UpstreamClient facade)
//!     → dispatcher.rs (URL + headers, breaker, limiter)
//!     → transport.rs (HTTP via reqwest)
//!     → upstream API
//! ```
//!
//! # Design Decisions
//! - The transport is a trait so the dispatcher runs against in-memory fakes
//! - Every call carries an `X-Request-ID` for correlating logs on both sides

pub mod client;
pub mod dispatcher;
pub mod error;
pub mod transport;

pub use client::{BreakerStatsView, ClientBuildError, LogOptions, UpstreamClient};
pub use dispatcher::{build_api_url, build_headers, ApiKey, ApiKeyError, RequestOptions};
pub use error::{TransportError, UpstreamError};
pub use transport::{ReqwestTransport, Transport, UpstreamRequest, UpstreamResponse};
