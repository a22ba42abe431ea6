//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to upstream target:
//!     → circuit_breaker.rs (fail fast if the target's circuit is open)
//!     → limiter.rs (wait for one of N process-wide slots, FIFO)
//!     → [transport call]
//!     → circuit_breaker.rs (record outcome, maybe transition)
//!
//! Background:
//!     pruning.rs (periodic sweep)
//!     → breaker_store.rs (evict idle CLOSED records)
//! ```
//!
//! # Design Decisions
//! - Per-target circuit breaker, process-wide concurrency limit
//! - Rejections never consume a limiter slot
//! - No retries here; the breaker is the defense against repeated failure
//! - All state lives in values owned by `UpstreamClient`, never in globals

pub mod breaker_store;
pub mod circuit_breaker;
pub mod limiter;
pub mod pruning;

pub use breaker_store::{BreakerRecord, BreakerState, BreakerStore};
pub use circuit_breaker::{BreakerStats, CircuitBreaker, FleetBreakerStats};
pub use limiter::{ConcurrencyLimiter, LimiterError};
pub use pruning::BreakerPruner;
