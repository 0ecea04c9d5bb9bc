//! Pool Sentinel - reward-pool program monitor for Solana
//!
//! This is the main entry point for the service. It wires the
//! monitoring pipeline to a live RPC endpoint and serves the status
//! API.

mod config;
mod error;
mod handlers;
mod ledger;
mod metrics;
mod models;
mod monitor;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;
use crate::handlers::AppState;
use crate::ledger::{parse_commitment, RpcLedgerReader};
use crate::metrics::MetricsState;
use crate::monitor::{HttpChannelSender, Monitor};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Starting Pool Sentinel v{}", env!("CARGO_PKG_VERSION"));

    let config = load_config()?;
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        program_id = %config.ledger.program_id,
        rpc_url = %config.ledger.rpc_url,
        "Configuration loaded"
    );

    let reader = Arc::new(RpcLedgerReader::new(
        config.ledger.rpc_url.clone(),
        parse_commitment(&config.ledger.commitment),
    ));
    let sender = Arc::new(HttpChannelSender::new()?);
    let monitor = Arc::new(Monitor::new(&config, reader, sender));

    monitor
        .start()
        .map_err(|e| anyhow::anyhow!("Failed to start monitor: {}", e))?;
    tracing::info!(
        rules = config.alerting.rules.len(),
        channels = config.alerting.channels.len(),
        "Monitor started"
    );

    let app_state = AppState {
        monitor: Arc::clone(&monitor),
        metrics: Arc::new(MetricsState::new()),
    };

    let app = handlers::router()
        .with_state(app_state)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("Invalid server address")?;

    tracing::info!(%addr, "Server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    monitor.stop().await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .unwrap_or_else(|e| tracing::error!(error = %e, "Failed to listen for ctrl-c"));
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to register SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("Shutdown signal received");
}

/// Initialize tracing/logging
fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pool_sentinel=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}

/// Load and validate configuration
fn load_config() -> anyhow::Result<AppConfig> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    let config = AppConfig::load().map_err(|e| {
        tracing::error!(error = %e, "Failed to load configuration");
        anyhow::anyhow!("Configuration error: {}", e)
    })?;

    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Configuration validation failed: {}", e))?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    #[test]
    fn test_version() {
        // Ensure version is set
        assert!(!env!("CARGO_PKG_VERSION").is_empty());
    }
}
