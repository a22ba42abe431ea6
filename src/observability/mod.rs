//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (structured log events via tracing)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Consumers:
//!     → Log aggregation (stdout)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured fields (endpoint, state, status) for machine parsing
//! - Request ID on every upstream call correlates dashboard and upstream logs
//! - API keys never reach a log line

pub mod logging;
pub mod metrics;
