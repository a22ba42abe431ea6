//! Startup orchestration.
//!
//! # Responsibilities
//! - Initialize subsystems in dependency order
//! - Start background tasks (metrics exporter, breaker pruning)
//! - Bind the admin listener last, once the client is ready
//! - Wait for a signal and shut everything down in reverse order
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Config is already loaded and validated by the caller

use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;

use crate::admin::AdminServer;
use crate::config::ServiceConfig;
use crate::lifecycle::{signals, Shutdown};
use crate::observability::metrics;
use crate::upstream::{ClientBuildError, UpstreamClient};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to build upstream client: {0}")]
    Client(#[from] ClientBuildError),

    #[error("invalid metrics address '{0}'")]
    MetricsAddress(String),

    #[error("failed to start metrics exporter: {0}")]
    Metrics(#[from] metrics_exporter_prometheus::BuildError),

    #[error("failed to bind admin listener: {0}")]
    Io(#[from] std::io::Error),
}

/// Run the service until SIGINT or SIGTERM.
pub async fn run(config: ServiceConfig) -> Result<(), StartupError> {
    if config.observability.metrics_enabled {
        let addr: SocketAddr = config
            .observability
            .metrics_address
            .parse()
            .map_err(|_| StartupError::MetricsAddress(config.observability.metrics_address.clone()))?;
        metrics::init_metrics(addr)?;
    }

    let client = Arc::new(UpstreamClient::from_config(&config)?);
    client.start_breaker_pruning();

    let shutdown = Shutdown::new();
    let admin_task = if config.admin.enabled {
        let listener = TcpListener::bind(&config.admin.bind_address).await?;
        let server = AdminServer::new(client.clone(), &config.admin);
        Some(tokio::spawn(server.run(listener, shutdown.subscribe())))
    } else {
        tracing::info!("Admin API disabled");
        None
    };

    tracing::info!("fleet-upstream ready");

    let signal = signals::wait_for_signal().await;
    tracing::info!(signal, "Shutdown signal received");

    shutdown.trigger();
    client.stop_breaker_pruning();

    if let Some(task) = admin_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Admin API exited with error"),
            Err(e) => tracing::error!(error = %e, "Admin API task panicked"),
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
