//! Admin API handlers.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::resilience::{BreakerState, FleetBreakerStats};
use crate::upstream::BreakerStatsView;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub breaker_state: BreakerState,
    pub tracked_endpoints: usize,
    pub pruning: bool,
    pub in_flight: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LimiterStatus {
    pub max_concurrent: usize,
    pub in_flight: usize,
    pub queued: usize,
}

#[derive(Debug, Serialize)]
pub struct PruneResult {
    pub removed: usize,
}

#[derive(Debug, Serialize)]
pub struct ResetResult {
    pub reset: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<ServiceStatus> {
    let fleet = state.client.breaker().fleet_stats();
    let status = if fleet.state == BreakerState::Closed {
        "operational"
    } else {
        "degraded"
    };

    Json(ServiceStatus {
        version: env!("CARGO_PKG_VERSION"),
        status,
        uptime_secs: state.started_at.elapsed().as_secs(),
        breaker_state: fleet.state,
        tracked_endpoints: fleet.by_endpoint.len(),
        pruning: state.client.is_pruning(),
        in_flight: state.client.limiter().in_flight(),
    })
}

pub async fn get_breakers(State(state): State<AdminState>) -> Json<FleetBreakerStats> {
    Json(state.client.breaker().fleet_stats())
}

pub async fn get_breaker(
    State(state): State<AdminState>,
    Path(target): Path<String>,
) -> Json<BreakerStatsView> {
    Json(state.client.circuit_breaker_stats(Some(&target)))
}

pub async fn get_limiter(State(state): State<AdminState>) -> Json<LimiterStatus> {
    let limiter = state.client.limiter();
    Json(LimiterStatus {
        max_concurrent: limiter.max_concurrent(),
        in_flight: limiter.in_flight(),
        queued: limiter.queued(),
    })
}

pub async fn prune_breakers(State(state): State<AdminState>) -> Json<PruneResult> {
    let removed = state.client.prune_stale_breakers();
    tracing::info!(removed, "Breaker prune requested via admin API");
    Json(PruneResult { removed })
}

pub async fn reset_state(State(state): State<AdminState>) -> Json<ResetResult> {
    state.client.reset_client_state();
    tracing::warn!("Client state reset via admin API");
    Json(ResetResult { reset: true })
}
