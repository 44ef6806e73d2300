mod bootstrap;
mod health;
mod service;

use std::time::Duration;

use anyhow::Result;
use helpline_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use helpline_core::config::LogFormat::*;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        app.db_pool.clone(),
    )
    .await?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = {
        let runner = app.runner.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move { runner.run(shutdown).await })
    };
    let sweeper = {
        let sweeper = app.sweeper.clone();
        tokio::spawn(async move { sweeper.run(shutdown_rx).await })
    };

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "helpline-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "helpline-server stopping"
    );

    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, async {
        let _ = poller.await;
        let _ = sweeper.await;
    })
    .await
    .is_err()
    {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "background tasks did not stop in time"
        );
    }

    app.db_pool.close().await;
    Ok(())
}
