//! Shutdown signal wiring.
//!
//! A single [`CancellationToken`] is the process-wide shutdown flag. Every
//! loop checks it at the top of an iteration; work already in flight (one
//! accept, one broadcast pass, one drain pass) runs to completion first.
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: graceful shutdown

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Spawns a task that cancels `token` on SIGINT or SIGTERM.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            result = wait_for_shutdown_signal() => {
                if let Err(e) = result {
                    error!(error = %e, "Error waiting for shutdown signal");
                }
                info!("Shutdown signal received");
            }
            _ = token.cancelled() => {}
        }
        token.cancel();
    })
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
