//! Points service binary
//!
//! Opens the store, starts the expiration scheduler and runs until ctrl-c.

use anyhow::Context;
use points_service::{LoggingConfig, PointsService, ServiceConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))
        .context("invalid log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServiceConfig::from_env().context("failed to load configuration")?;
    init_tracing(&config.logging)?;

    tracing::info!(
        data_dir = %config.ledger.data_dir.display(),
        scheduler_enabled = config.scheduler.enabled,
        interval_secs = config.scheduler.interval_secs,
        "Starting points server"
    );

    let service = PointsService::open(&config).context("failed to open points service")?;
    let (scheduler, scheduler_task) = service.start_scheduler();

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down points server");
    scheduler.shutdown().await?;
    scheduler_task.await.context("scheduler task failed")?;
    Ok(())
}
