//! Metrics collection and exposition.
//!
//! # Responsibilities
//! - Define upstream client metrics (calls, latency, breaker state, limiter)
//! - Expose a Prometheus-compatible scrape endpoint
//!
//! # Metrics
//! - `upstream_requests_total` (counter): calls by endpoint, outcome
//! - `upstream_request_duration_seconds` (histogram): latency by endpoint
//! - `upstream_circuit_rejections_total` (counter): fast-fail rejections by endpoint
//! - `upstream_breaker_state` (gauge): 0=closed, 1=half-open, 2=open
//! - `upstream_limiter_in_flight` (gauge): calls holding a limiter slot
//! - `upstream_breakers_pruned_total` (counter): records evicted by pruning
//!
//! # Design Decisions
//! - Recording goes through the `metrics` facade; without an installed
//!   recorder every call is a no-op, so tests need no setup

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::resilience::breaker_store::BreakerState;

/// Install the Prometheus recorder and its HTTP listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    describe_counter!("upstream_requests_total", "Upstream calls by endpoint and outcome");
    describe_histogram!(
        "upstream_request_duration_seconds",
        "Upstream call latency in seconds"
    );
    describe_counter!(
        "upstream_circuit_rejections_total",
        "Calls rejected by an open circuit"
    );
    describe_gauge!(
        "upstream_breaker_state",
        "Circuit state per endpoint (0=closed, 1=half-open, 2=open)"
    );
    describe_gauge!("upstream_limiter_in_flight", "Calls holding a limiter slot");
    describe_counter!(
        "upstream_breakers_pruned_total",
        "Idle breaker records evicted"
    );

    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

/// Record a completed upstream call.
pub fn record_request(endpoint: &str, outcome: &'static str, start: Instant) {
    counter!(
        "upstream_requests_total",
        "endpoint" => endpoint.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    histogram!(
        "upstream_request_duration_seconds",
        "endpoint" => endpoint.to_string()
    )
    .record(start.elapsed().as_secs_f64());
}

pub fn record_circuit_rejection(endpoint: &str) {
    counter!(
        "upstream_circuit_rejections_total",
        "endpoint" => endpoint.to_string()
    )
    .increment(1);
}

pub fn record_breaker_state(endpoint: &str, state: BreakerState) {
    gauge!("upstream_breaker_state", "endpoint" => endpoint.to_string()).set(state.as_gauge());
}

pub fn record_limiter_in_flight(in_flight: usize) {
    gauge!("upstream_limiter_in_flight").set(in_flight as f64);
}

pub fn record_breakers_pruned(count: usize) {
    counter!("upstream_breakers_pruned_total").increment(count as u64);
}
