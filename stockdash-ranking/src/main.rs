//! Stockdash Ranking Service
//!
//! Keeps the dashboard's ranking and listing caches warm.

use anyhow::{Context, Result};
use std::time::Instant;
use tracing::{error, info};

use stockdash_common::logging::init_logging_with_exclusions;
use stockdash_common::Config;
use stockdash_ranking::RankingService;

#[tokio::main]
async fn main() -> Result<()> {
    let startup_start = Instant::now();

    let config = Config::load_with_env().context("failed to load configuration")?;

    init_logging_with_exclusions(
        &config.observability.log_level,
        &config.observability.log_format,
        &config.observability.excluded_targets,
    );

    info!("Starting Stockdash Ranking v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = config.validate() {
        error!(error = %e, "Invalid configuration");
        return Err(e).context("invalid configuration");
    }

    let service = RankingService::from_config(&config).await?;
    service.start().await;

    info!(
        startup_ms = startup_start.elapsed().as_millis() as u64,
        universe = service.engine().universe_size(),
        "Ranking service ready"
    );

    wait_for_shutdown().await?;

    service.shutdown().await;
    Ok(())
}

async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => info!("Received SIGINT, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Shutting down");
    }
    Ok(())
}
