mod adapters;
mod api;
mod audit_writer;
mod bootstrap;
mod health;
mod inbound;
mod review;
#[cfg(test)]
mod testing;

use std::time::Duration;

use anyhow::Result;
use axum::Router;
use parley_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use parley_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Logging comes up before bootstrap so its events are visible.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let drain_timeout = Duration::from_secs(app.config.server.graceful_shutdown_secs);

    let router = Router::new().merge(health::router(app.db_pool.clone())).merge(api::router(app.api));
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "parley-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "parley-server draining audit queue"
    );

    // The router owned the last audit sinks, so the writer ends once drained.
    if tokio::time::timeout(drain_timeout, app.audit_writer).await.is_err() {
        tracing::warn!(
            event_name = "system.server.audit_drain_timeout",
            correlation_id = "shutdown",
            timeout_secs = drain_timeout.as_secs(),
            "audit queue not drained before shutdown deadline"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "failed to listen for shutdown signal"
        );
    }
}
