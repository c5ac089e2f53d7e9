//! Telemetry server: listener setup, the two loops, and orderly teardown.
//!
//! # Lifecycle
//!
//! ```text
//! Starting ──bind ok──▶ Running ──cancel──▶ Draining ──▶ Stopped
//!     │
//!     └──bind error──▶ Failed (Error event emitted, process exits non-zero)
//! ```
//!
//! Draining waits for the current broadcast pass, then closes every client
//! and emits `Server stopped.` before the tee writer is flushed.

mod accept;
mod broadcast;

pub use accept::{AcceptLoop, Acceptor};
pub use broadcast::{BroadcastLoop, TickOutcome};

use std::net::SocketAddr;

use pulse_core::Sampler;
use pulse_protocol::LogEvent;
use thiserror::Error;
use tokio::net::{TcpListener, TcpSocket};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::registry::ClientRegistry;
use crate::tee::{spawn_tee, TeeHandle, TeeStats};

/// Errors that stop a telemetry server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Socket creation, bind or listen failed.
    #[error("failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    /// The bound listener could not report its address.
    #[error("listener error: {0}")]
    Io(#[from] std::io::Error),
}

/// Creates the listening socket with SO_REUSEADDR and the configured backlog.
pub fn bind_listener(config: &ServerConfig) -> Result<TcpListener, ServerError> {
    let addr = config.listen_addr();
    let bind_error = |e: std::io::Error| ServerError::Bind {
        addr,
        error: e.to_string(),
    };

    let socket = TcpSocket::new_v4().map_err(bind_error)?;
    socket.set_reuseaddr(true).map_err(bind_error)?;
    socket.bind(addr).map_err(bind_error)?;
    socket.listen(config.backlog).map_err(bind_error)
}

/// One telemetry server (time or system).
pub struct TelemetryServer {
    config: ServerConfig,
    cancel_token: CancellationToken,
}

impl TelemetryServer {
    pub fn new(config: ServerConfig, cancel_token: CancellationToken) -> Self {
        Self {
            config,
            cancel_token,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Binds, serves until cancelled, and tears down.
    ///
    /// # Errors
    ///
    /// - `ServerError::Bind` if the listening socket cannot be set up. The
    ///   failure is also sent to the log channel before returning.
    pub async fn run(self, sampler: Box<dyn Sampler>) -> Result<(), ServerError> {
        let (tee, tee_task) = self.start_tee();

        let listener = match bind_listener(&self.config) {
            Ok(listener) => listener,
            Err(e) => {
                error!(kind = %self.config.kind, error = %e, "Failed to start server");
                tee.emit(LogEvent::error(e.to_string()));
                finish_tee(tee, tee_task).await;
                return Err(e);
            }
        };

        let result = self.serve(listener, sampler, tee.clone()).await;
        finish_tee(tee, tee_task).await;
        result
    }

    /// Serves on an already bound listener until cancelled.
    ///
    /// Events go to `tee`; the caller owns the tee writer's lifetime.
    pub async fn serve(
        self,
        listener: TcpListener,
        sampler: Box<dyn Sampler>,
        tee: TeeHandle,
    ) -> Result<(), ServerError> {
        let local_addr = listener.local_addr()?;

        info!(
            kind = %self.config.kind,
            addr = %local_addr,
            "Server started"
        );
        tee.emit(LogEvent::server_started(local_addr.port()));

        let registry = ClientRegistry::new(self.config.write_timeout());

        let broadcaster = BroadcastLoop::new(
            sampler,
            registry.clone(),
            tee.clone(),
            self.config.tick_interval(),
        );
        let broadcast_task = tokio::spawn(broadcaster.run(self.cancel_token.clone()));

        AcceptLoop::new(listener, registry.clone(), tee.clone())
            .run(self.cancel_token.clone())
            .await;

        // Draining: the listener is closed; let the current pass finish.
        self.cancel_token.cancel();
        if let Err(e) = broadcast_task.await {
            error!(error = %e, "Broadcast task failed");
        }

        let closed = registry.shutdown().await;
        info!(kind = %self.config.kind, closed, "Server stopped");
        tee.emit(LogEvent::server_stopped());

        Ok(())
    }

    fn start_tee(&self) -> (TeeHandle, Option<JoinHandle<TeeStats>>) {
        if self.config.tee_enabled {
            let (tee, task) = spawn_tee(self.config.pipe_path.clone(), self.config.tee_queue);
            (tee, Some(task))
        } else {
            info!(kind = %self.config.kind, "Log tee disabled");
            (TeeHandle::disabled(), None)
        }
    }
}

/// Releases the last producer handle and waits for queued events to be written.
async fn finish_tee(tee: TeeHandle, task: Option<JoinHandle<TeeStats>>) {
    let queue_dropped = tee.queue_dropped();
    drop(tee);

    let Some(task) = task else {
        return;
    };

    match task.await {
        Ok(stats) => info!(
            written = stats.written,
            dropped = stats.dropped + queue_dropped,
            "Log tee closed"
        ),
        Err(e) => warn!(error = %e, "Log tee writer failed"),
    }
}
