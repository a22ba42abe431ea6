//! fleet-upstream service.
//!
//! Hosts the resilient upstream client for a container-fleet dashboard.
//!
//! ```text
//!                         ┌──────────────────────────────────────────────┐
//!                         │                fleet-upstream                 │
//!                         │                                               │
//!   dashboard / admin     │  ┌─────────┐   ┌──────────┐   ┌───────────┐   │
//!   ──────────────────────┼─▶│dispatch │──▶│ breaker  │──▶│  limiter  │───┼──▶ Docker
//!                         │  └─────────┘   └──────────┘   └───────────┘   │    management
//!                         │       │                                       │    API
//!                         │       ▼                                       │
//!                         │  ┌─────────────────┐  ┌────────────────────┐  │
//!                         │  │ log decoding    │  │ label sanitizing   │  │
//!                         │  └─────────────────┘  └────────────────────┘  │
//!                         │                                               │
//!                         │  pruning task · admin API · metrics · logs    │
//!                         └──────────────────────────────────────────────┘
//! ```

use clap::Parser;
use std::path::PathBuf;

use fleet_upstream::config::{self, ServiceConfig};
use fleet_upstream::lifecycle::startup;
use fleet_upstream::observability::logging;

#[derive(Parser)]
#[command(name = "fleet-upstream")]
#[command(about = "Resilient upstream client service for the fleet dashboard", long_about = None)]
struct Args {
    /// Path to a TOML config file. Without one, defaults plus environment are used.
    #[arg(short, long, env = "FLEET_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config: ServiceConfig = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::load_from_env()?,
    };

    logging::init_logging(&config.observability);

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "fleet-upstream starting");
    tracing::info!(
        base_url = %config.upstream.base_url,
        max_concurrent = config.limiter.max_concurrent,
        failure_threshold = config.breaker.failure_threshold,
        recovery_timeout_ms = config.breaker.recovery_timeout_ms,
        admin_enabled = config.admin.enabled,
        "Configuration loaded"
    );

    startup::run(config).await?;
    Ok(())
}
