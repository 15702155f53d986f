mod audit;
mod bootstrap;
mod health;
mod sweeper;

use std::time::Duration;

use anyhow::Result;
use sizer_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use sizer_core::config::LogFormat::*;
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
    // Logging needs the loaded config, so it comes first.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState {
            db_pool: app.db_pool.clone(),
            adjustment_enabled: app.adjustment_enabled,
        },
    )
    .await?;

    let sweeper = sweeper::spawn(
        app.sessions.clone(),
        app.conversation.clone(),
        app.config.sessions.idle_timeout(),
        app.config.sessions.sweep_interval(),
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        adjustment_enabled = app.adjustment_enabled,
        billing_enabled = app.config.billing.enabled,
        "sizer-server started"
    );

    tokio::select! {
        result = app.runner.start() => {
            result?;
            tracing::warn!(
                event_name = "system.server.runner_stopped",
                correlation_id = "shutdown",
                "update loop ended"
            );
        }
        signal = wait_for_shutdown() => signal?,
    }

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "sizer-server stopping"
    );
    sweeper.abort();
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.db_pool.close()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            "database pool did not close within the grace period"
        );
    }

    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
