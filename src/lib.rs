//! Resilient client layer for a Docker management API.

pub mod admin;
pub mod config;
pub mod docker;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod upstream;

pub use config::ServiceConfig;
pub use lifecycle::Shutdown;
pub use upstream::{UpstreamClient, UpstreamError};
