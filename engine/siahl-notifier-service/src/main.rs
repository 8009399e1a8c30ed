//! SIAHL Notifier
//!
//! Watches SIAHL schedules and locker-room listings and notifies followers of
//! their team's games.

use anyhow::{Context, Result};
use clap::Parser;
use job_scheduler::JobKind;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use siahl_notifier_service::{
    graceful_shutdown, initialize_logging_with_config, load_config, render_config,
    setup_signal_handlers, ServiceState,
};

#[derive(Parser)]
#[command(name = "siahl-notifier")]
#[command(about = "Game-day, locker-room and final-score notifications for SIAHL teams")]
#[command(version)]
struct Cli {
    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run one job and exit (cache-refresh, game-day-check, pre-game-check, post-game-monitor)
    #[arg(long, value_name = "JOB")]
    run_once: Option<JobKind>,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = load_config(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.print_config {
        println!("{}", render_config(&config)?);
        return Ok(());
    }

    let _log_guard = initialize_logging_with_config(
        &config.logging.level,
        &config.logging.format,
        config.logging.file.as_deref(),
    )?;

    info!("Starting SIAHL Notifier v{}", env!("CARGO_PKG_VERSION"));

    let service_state = Arc::new(ServiceState::new(config).await?);
    info!("Service state initialized");

    if let Some(job) = cli.run_once {
        let report = service_state.run_once(job).await;
        service_state.log_metrics();
        service_state.stop().await?;
        let report = report?;
        info!("{}", report);
        return Ok(());
    }

    let shutdown_signal = setup_signal_handlers()?;
    service_state.start().await?;

    info!("SIAHL Notifier is running. Press Ctrl+C to shutdown gracefully.");
    let _ = shutdown_signal.await;

    info!("Shutdown signal received. Initiating graceful shutdown...");
    graceful_shutdown(service_state).await?;

    info!("SIAHL Notifier shutdown complete");
    Ok(())
}
