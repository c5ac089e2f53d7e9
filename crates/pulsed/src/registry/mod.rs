//! Shared registry of connected TCP clients.
//!
//! The registry is the only state touched by more than one task: the accept
//! loop inserts, the broadcast loop fans out and evicts.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────┐  register()   ┌──────────────────────────────┐
//! │ AcceptLoop  │──────────────▶│ Mutex<RegistryState>         │
//! └─────────────┘               │   HashMap<ClientId, Handle>  │
//!                               │   closed: bool               │
//! ┌─────────────┐  broadcast()  │                              │
//! │BroadcastLoop│──────────────▶│ one pass = one lock hold:    │
//! └─────────────┘               │   drain → concurrent sends → │
//!                               │   re-insert survivors        │
//!                               └──────────────────────────────┘
//! ```
//!
//! The lock is held for exactly one insert or one full broadcast pass, so a
//! client is either in a pass or not, and a failed peer is gone before the
//! pass returns. Sends inside a pass run concurrently and are individually
//! bounded by the write timeout.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Send failures are returned as records, never raised

mod client;

pub use client::{BroadcastReport, ClientHandle, ClientId, SendError, SendFailure};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error};

/// Errors returned by registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The registry has been shut down; the stream was closed.
    #[error("client registry is shut down")]
    Closed,
}

struct RegistryState<S> {
    clients: HashMap<ClientId, ClientHandle<S>>,
    closed: bool,
}

/// Thread-safe set of connected peers.
///
/// Cheap to clone; all clones share the same set.
pub struct ClientRegistry<S = TcpStream> {
    state: Arc<Mutex<RegistryState<S>>>,
    next_id: Arc<AtomicU64>,
    write_timeout: Duration,
}

impl<S> Clone for ClientRegistry<S> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            next_id: Arc::clone(&self.next_id),
            write_timeout: self.write_timeout,
        }
    }
}

impl<S> ClientRegistry<S>
where
    S: AsyncWrite + Unpin + Send + 'static,
{
    /// Creates an empty registry.
    ///
    /// `write_timeout` bounds each individual send; a peer that cannot take
    /// a snapshot within it is treated as failed.
    pub fn new(write_timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RegistryState {
                clients: HashMap::new(),
                closed: false,
            })),
            next_id: Arc::new(AtomicU64::new(1)),
            write_timeout,
        }
    }

    /// Registers a connected stream and returns its id.
    ///
    /// # Errors
    ///
    /// - `RegistryError::Closed` after [`shutdown`](Self::shutdown); the
    ///   stream is closed before returning.
    pub async fn register(&self, stream: S, peer: impl Into<String>) -> Result<ClientId, RegistryError> {
        let mut state = self.state.lock().await;

        if state.closed {
            drop(state);
            let mut stream = stream;
            let _ = timeout(self.write_timeout, stream.shutdown()).await;
            return Err(RegistryError::Closed);
        }

        let id = ClientId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let peer = peer.into();
        state.clients.insert(id, ClientHandle { id, peer, stream });

        debug!(client_id = %id, clients = state.clients.len(), "Registered client");
        Ok(id)
    }

    /// Sends `payload` to every registered client.
    ///
    /// Every client present when the pass starts gets exactly one attempt.
    /// Clients whose send fails are removed and closed before this returns,
    /// and are reported in [`BroadcastReport::failures`].
    pub async fn broadcast(&self, payload: &[u8]) -> BroadcastReport {
        let mut state = self.state.lock().await;
        let mut report = BroadcastReport::default();

        if state.clients.is_empty() {
            return report;
        }

        let payload: Arc<[u8]> = Arc::from(payload);
        let write_timeout = self.write_timeout;
        let mut sends = JoinSet::new();

        for (_, mut handle) in state.clients.drain() {
            let payload = Arc::clone(&payload);
            sends.spawn(async move {
                let result = send_to(&mut handle.stream, &payload, write_timeout).await;
                (handle, result)
            });
        }

        while let Some(joined) = sends.join_next().await {
            match joined {
                Ok((handle, Ok(()))) => {
                    report.delivered += 1;
                    state.clients.insert(handle.id, handle);
                }
                Ok((handle, Err(error))) => {
                    debug!(client_id = %handle.id, error = %error, "Evicting client");
                    report.failures.push(SendFailure {
                        client: handle.id,
                        peer: handle.peer.clone(),
                        error,
                    });
                    // Dropping the handle closes the stream.
                    drop(handle);
                }
                Err(e) => {
                    // The handle went down with the task; its stream is closed.
                    error!(error = %e, "Broadcast send task failed");
                }
            }
        }

        report
    }

    /// Removes and closes every client. Idempotent.
    ///
    /// Clients are closed concurrently, so the whole call takes at most one
    /// write timeout. Returns the number of clients closed by this call.
    /// Later registrations are refused.
    pub async fn shutdown(&self) -> usize {
        let mut state = self.state.lock().await;
        state.closed = true;

        let closed = state.clients.len();
        let write_timeout = self.write_timeout;
        let mut closes = JoinSet::new();

        for (id, mut handle) in state.clients.drain() {
            closes.spawn(async move {
                if timeout(write_timeout, handle.stream.shutdown()).await.is_err() {
                    debug!(client_id = %id, "Client shutdown timed out");
                }
            });
        }

        while let Some(joined) = closes.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Client close task failed");
            }
        }

        if closed > 0 {
            debug!(closed, "Closed all clients");
        }
        closed
    }

    /// Returns the number of registered clients.
    pub async fn len(&self) -> usize {
        self.state.lock().await.clients.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.clients.is_empty()
    }

    /// Returns true once [`shutdown`](Self::shutdown) has been called.
    pub async fn is_closed(&self) -> bool {
        self.state.lock().await.closed
    }

    /// Returns true if `id` is currently registered.
    pub async fn contains(&self, id: ClientId) -> bool {
        self.state.lock().await.clients.contains_key(&id)
    }
}

async fn send_to<S>(stream: &mut S, payload: &[u8], write_timeout: Duration) -> Result<(), SendError>
where
    S: AsyncWrite + Unpin,
{
    let write = async {
        stream.write_all(payload).await?;
        stream.flush().await
    };

    match timeout(write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(SendError::io(&e)),
        Err(_) => Err(SendError::Timeout),
    }
}
