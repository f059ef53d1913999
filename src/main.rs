//! sqlkeep - Main entry point.
//!
//! Reads the SQL connection settings from the environment, keeps the
//! connection alive with retries, publishes pool statistics and reports
//! health until interrupted.

use clap::Parser;
use sqlkeep::config::{Config, EnvConfig};
use sqlkeep::db::{ConnectionManager, DriverRegistry};
use sqlkeep::metrics::OtelMetrics;
use sqlkeep::models::{ConnectionConfig, ConnectionState};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!("Starting sqlkeep v{}", env!("CARGO_PKG_VERSION"));

    let connection = ConnectionConfig::from_source(&EnvConfig)?;
    let manager = ConnectionManager::new(
        connection,
        &DriverRegistry::with_defaults(),
        Arc::new(OtelMetrics::new()),
        config.manager_options(),
    )?;

    if manager.state() == ConnectionState::NotConfigured {
        warn!("DB_DIALECT is not set, nothing to connect to");
        return Ok(());
    }

    tokio::select! {
        result = manager.wait_until_connected() => {
            if let Err(e) = result {
                error!(error = %e, "SQL connection did not come up");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted before the SQL connection was established");
            manager.shutdown().await;
            return Ok(());
        }
    }

    let health = manager.health_check().await;
    match serde_json::to_string(&health) {
        Ok(json) => info!(health = %json, "SQL datastore health"),
        Err(e) => warn!(error = %e, "could not encode health report"),
    }

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
    }

    info!("Shutting down");
    manager.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}
