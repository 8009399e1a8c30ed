//! Signal handling for graceful shutdown

use anyhow::{Context, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{error, info};

use crate::service::ServiceState;

/// Resolve the returned receiver on Ctrl+C or SIGTERM
pub fn setup_signal_handlers() -> Result<oneshot::Receiver<()>> {
    let (shutdown_tx, shutdown_rx) = oneshot::channel();

    let terminate = Arc::new(AtomicBool::new(false));
    #[cfg(unix)]
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&terminate))
        .context("Failed to register SIGTERM handler")?;

    tokio::spawn(async move {
        tokio::select! {
            result = tokio::signal::ctrl_c() => match result {
                Ok(()) => info!("Ctrl+C signal received"),
                Err(e) => {
                    error!("Failed to listen for Ctrl+C signal: {}", e);
                    wait_for_flag(&terminate).await;
                    info!("SIGTERM signal received");
                }
            },
            _ = wait_for_flag(&terminate) => info!("SIGTERM signal received"),
        }
        let _ = shutdown_tx.send(());
    });

    Ok(shutdown_rx)
}

async fn wait_for_flag(flag: &AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

/// Stop the scheduler and release storage
pub async fn graceful_shutdown(service_state: Arc<ServiceState>) -> Result<()> {
    info!("Starting graceful shutdown...");

    if let Err(e) = service_state.stop().await {
        error!("Failed to stop service cleanly: {}", e);
    }
    service_state.log_metrics();

    info!("Graceful shutdown complete");
    Ok(())
}
