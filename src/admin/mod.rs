//! Admin API.
//!
//! # Data Flow
//! ```text
//! operator / upstream-cli
//!     → server.rs (listener, tower-http layers, graceful shutdown)
//!     → auth.rs (bearer token check)
//!     → handlers.rs (breaker stats, limiter, prune, reset)
//!     → UpstreamClient
//! ```
//!
//! # Design Decisions
//! - Read-mostly: the only mutations are prune and reset
//! - Every route requires the admin key; there is no anonymous endpoint

pub mod auth;
pub mod handlers;
pub mod server;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;

use self::auth::admin_auth_middleware;
use self::handlers::*;
use crate::upstream::UpstreamClient;

pub use server::AdminServer;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub client: Arc<UpstreamClient>,
    pub api_key: Arc<str>,
    pub started_at: Instant,
}

impl AdminState {
    pub fn new(client: Arc<UpstreamClient>, api_key: &str) -> Self {
        Self {
            client,
            api_key: Arc::from(api_key),
            started_at: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/breakers", get(get_breakers))
        .route("/admin/breakers/prune", post(prune_breakers))
        .route("/admin/breakers/{target}", get(get_breaker))
        .route("/admin/limiter", get(get_limiter))
        .route("/admin/reset", post(reset_state))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
