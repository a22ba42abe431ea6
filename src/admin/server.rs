//! Admin HTTP server.
//!
//! # Responsibilities
//! - Wrap the admin router in request-id, trace and timeout layers
//! - Serve until the shutdown broadcast fires

use axum::{http::HeaderName, Router};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::admin::{setup_admin_router, AdminState};
use crate::config::AdminConfig;
use crate::upstream::UpstreamClient;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");

/// Admin API server.
pub struct AdminServer {
    router: Router,
}

impl AdminServer {
    pub fn new(client: Arc<UpstreamClient>, config: &AdminConfig) -> Self {
        let state = AdminState::new(client, &config.api_key);
        let router = Self::build_router(state, Duration::from_secs(config.request_timeout_secs));
        Self { router }
    }

    #[allow(deprecated)]
    fn build_router(state: AdminState, request_timeout: Duration) -> Router {
        setup_admin_router(state)
            .layer(TimeoutLayer::new(request_timeout))
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
    }

    /// The fully layered router.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve on `listener` until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "Admin API listening");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("Admin API stopped");
        Ok(())
    }
}
