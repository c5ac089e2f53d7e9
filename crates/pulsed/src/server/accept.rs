//! Accept loop: admits new TCP clients into the registry.

use std::future::poll_fn;
use std::io;
use std::net::SocketAddr;
use std::task::{Context, Poll};
use std::time::Duration;

use pulse_protocol::LogEvent;
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::registry::{ClientRegistry, RegistryError};
use crate::tee::TeeHandle;

/// Pause after a failed accept so a persistent error (EMFILE) does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Source of incoming connections.
pub trait Acceptor: Send + Sync + 'static {
    type Stream: AsyncWrite + Unpin + Send + 'static;

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(Self::Stream, SocketAddr)>>;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<io::Result<(TcpStream, SocketAddr)>> {
        match TcpListener::poll_accept(self, cx) {
            Poll::Ready(Ok((stream, peer))) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                }
                Poll::Ready(Ok((stream, peer)))
            }
            other => other,
        }
    }
}

pub struct AcceptLoop<L: Acceptor = TcpListener> {
    listener: L,
    registry: ClientRegistry<L::Stream>,
    tee: TeeHandle,
}

impl<L: Acceptor> AcceptLoop<L> {
    pub fn new(listener: L, registry: ClientRegistry<L::Stream>, tee: TeeHandle) -> Self {
        Self {
            listener,
            registry,
            tee,
        }
    }

    /// Accepts connections until `cancel_token` fires.
    ///
    /// Only successfully accepted connections are registered. Accept errors
    /// are logged and the loop continues.
    pub async fn run(self, cancel_token: CancellationToken) {
        loop {
            let accepted = tokio::select! {
                biased;

                _ = cancel_token.cancelled() => {
                    info!("Accept loop shutting down");
                    break;
                }

                accepted = poll_fn(|cx| self.listener.poll_accept(cx)) => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    match self.registry.register(stream, peer.to_string()).await {
                        Ok(client_id) => {
                            info!(client_id = %client_id, peer = %peer, "Client connected");
                            self.tee.emit(LogEvent::client_connected(client_id, peer));
                        }
                        Err(RegistryError::Closed) => {
                            debug!(peer = %peer, "Registry closed, refusing connection");
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    self.tee.emit(LogEvent::error(format!("accept failed: {e}")));

                    tokio::select! {
                        _ = cancel_token.cancelled() => break,
                        _ = tokio::time::sleep(ACCEPT_ERROR_BACKOFF) => {}
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use pulse_protocol::EventKind;
    use tokio::io::{duplex, DuplexStream};
    use tokio::sync::mpsc;

    type Accepted = io::Result<(DuplexStream, SocketAddr)>;

    /// Hands out whatever results the test queues; pending when empty.
    struct QueuedAcceptor {
        results: Mutex<mpsc::UnboundedReceiver<Accepted>>,
    }

    impl Acceptor for QueuedAcceptor {
        type Stream = DuplexStream;

        fn poll_accept(&self, cx: &mut Context<'_>) -> Poll<Accepted> {
            let mut results = self.results.lock().unwrap();
            match results.poll_recv(cx) {
                Poll::Ready(Some(result)) => Poll::Ready(result),
                Poll::Ready(None) | Poll::Pending => Poll::Pending,
            }
        }
    }

    fn peer(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[tokio::test]
    async fn test_accept_error_is_reported_and_loop_continues() {
        let (queue, results) = mpsc::unbounded_channel();
        let acceptor = QueuedAcceptor {
            results: Mutex::new(results),
        };
        let registry = ClientRegistry::new(Duration::from_millis(200));
        let (sender, mut events) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(
            AcceptLoop::new(acceptor, registry.clone(), TeeHandle::new(sender)).run(cancel.clone()),
        );

        queue
            .send(Err(io::Error::new(io::ErrorKind::Other, "too many open files")))
            .unwrap();
        let (stream, _client_end) = duplex(64);
        queue.send(Ok((stream, peer(40000)))).unwrap();

        let error = events.recv().await.unwrap();
        assert_eq!(error.kind(), EventKind::Error);
        assert_eq!(error.to_string(), "Error: accept failed: too many open files");

        let connected = events.recv().await.unwrap();
        assert!(connected
            .to_string()
            .starts_with("Client connected: client-1 (127.0.0.1:40000)"));
        assert_eq!(registry.len().await, 1);

        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_stops_when_registry_closed() {
        let (queue, results) = mpsc::unbounded_channel();
        let acceptor = QueuedAcceptor {
            results: Mutex::new(results),
        };
        let registry = ClientRegistry::new(Duration::from_millis(200));
        registry.shutdown().await;

        let task = tokio::spawn(
            AcceptLoop::new(acceptor, registry.clone(), TeeHandle::disabled())
                .run(CancellationToken::new()),
        );

        let (stream, _client_end) = duplex(64);
        queue.send(Ok((stream, peer(40001)))).unwrap();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(registry.is_empty().await);
    }
}
