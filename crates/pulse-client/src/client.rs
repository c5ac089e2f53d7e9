//! TCP watch client for one telemetry server.
//!
//! # Connection Lifecycle
//!
//! 1. Connect to `host:port`, retrying with exponential backoff
//! 2. Read lines, feeding them to a [`BlockDecoder`]
//! 3. Forward every completed block as [`WatchEvent::Snapshot`]
//! 4. On EOF or error, report [`WatchEvent::Disconnected`] and go back to 1
//!
//! A malformed line discards the lines of the block received so far;
//! decoding resumes with the next line.

use std::time::Duration;

use pulse_protocol::{BlockDecoder, SnapshotBlock};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ClientError, Result};

// ============================================================================
// Configuration
// ============================================================================

/// Connection settings for one server.
///
/// # Example
///
/// ```rust
/// use pulse_client::WatchConfig;
/// use std::time::Duration;
///
/// let config = WatchConfig {
///     port: 8081,
///     retry_initial_delay: Duration::from_millis(200),
///     ..Default::default()
/// };
/// assert_eq!(config.addr(), "127.0.0.1:8081");
/// ```
#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub host: String,
    pub port: u16,

    /// Initial delay before the first retry after a failed connect.
    pub retry_initial_delay: Duration,

    /// Maximum delay between retry attempts.
    pub retry_max_delay: Duration,

    /// Multiplier for exponential backoff (2.0 doubles the delay each retry).
    pub retry_multiplier: f64,
}

impl WatchConfig {
    /// Config for `port` on localhost with default backoff.
    pub fn for_port(port: u16) -> Self {
        Self {
            port,
            ..Default::default()
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn next_delay(&self, delay: Duration) -> Duration {
        let next_ms = (delay.as_millis() as f64 * self.retry_multiplier) as u64;
        Duration::from_millis(next_ms).min(self.retry_max_delay)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            retry_initial_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            retry_multiplier: 2.0,
        }
    }
}

// ============================================================================
// Events
// ============================================================================

/// What the client reports to its consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Connected { port: u16 },
    Snapshot { port: u16, block: SnapshotBlock },
    Disconnected { port: u16 },
}

// ============================================================================
// Watch Client
// ============================================================================

pub struct WatchClient {
    config: WatchConfig,
    event_tx: mpsc::UnboundedSender<WatchEvent>,
    cancel_token: CancellationToken,
}

impl WatchClient {
    #[must_use]
    pub fn new(
        config: WatchConfig,
        event_tx: mpsc::UnboundedSender<WatchEvent>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            event_tx,
            cancel_token,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Maintains the connection until cancelled or the event consumer is gone.
    pub async fn run(&self) {
        info!(addr = %self.config.addr(), "Watch client starting");

        loop {
            if self.cancel_token.is_cancelled() {
                break;
            }

            let stream = match self.connect_with_retry().await {
                Ok(stream) => stream,
                Err(ClientError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Failed to connect");
                    continue;
                }
            };

            if self.send(WatchEvent::Connected { port: self.config.port }).is_err() {
                break;
            }

            match self.handle_connection(stream).await {
                Ok(()) => info!(addr = %self.config.addr(), "Server closed connection"),
                Err(ClientError::Cancelled) => break,
                Err(ClientError::ChannelClosed) => return,
                Err(e) => warn!(error = %e, "Connection ended with error"),
            }

            if self.send(WatchEvent::Disconnected { port: self.config.port }).is_err() {
                break;
            }
        }

        info!(addr = %self.config.addr(), "Watch client stopped");
    }

    /// Connects, retrying indefinitely with exponential backoff.
    ///
    /// # Errors
    ///
    /// - `ClientError::Cancelled` if the token fires while waiting
    async fn connect_with_retry(&self) -> Result<TcpStream> {
        let addr = self.config.addr();
        let mut delay = self.config.retry_initial_delay;
        let mut attempt = 0u32;

        loop {
            attempt = attempt.saturating_add(1);

            match TcpStream::connect(&addr).await {
                Ok(stream) => {
                    debug!(attempt, addr = %addr, "Connection successful");
                    return Ok(stream);
                }
                Err(e) => {
                    let error = ClientError::Connection {
                        addr: addr.clone(),
                        message: e.to_string(),
                    };
                    if attempt == 1 {
                        warn!(error = %error, "Server not reachable, will retry");
                    } else {
                        debug!(attempt, error = %error, "Connection attempt failed");
                    }
                }
            }

            tokio::select! {
                _ = sleep(delay) => {
                    delay = self.config.next_delay(delay);
                }
                _ = self.cancel_token.cancelled() => {
                    return Err(ClientError::Cancelled);
                }
            }
        }
    }

    /// Reads blocks until EOF.
    async fn handle_connection(&self, stream: TcpStream) -> Result<()> {
        let mut lines = BufReader::new(stream).lines();
        let mut decoder = BlockDecoder::new();

        loop {
            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = self.cancel_token.cancelled() => return Err(ClientError::Cancelled),
            };

            let Some(line) = line else {
                return Ok(());
            };

            match decoder.push_line(&line) {
                Ok(Some(block)) => {
                    self.send(WatchEvent::Snapshot {
                        port: self.config.port,
                        block,
                    })?;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(error = %ClientError::from(e), "Discarding malformed block");
                }
            }
        }
    }

    fn send(&self, event: WatchEvent) -> Result<()> {
        self.event_tx
            .send(event)
            .map_err(|_| ClientError::ChannelClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::MetricKey;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    fn fast_config(port: u16) -> WatchConfig {
        WatchConfig {
            port,
            retry_initial_delay: Duration::from_millis(10),
            retry_max_delay: Duration::from_millis(40),
            ..Default::default()
        }
    }

    async fn next_event(rx: &mut mpsc::UnboundedReceiver<WatchEvent>) -> WatchEvent {
        timeout(WAIT, rx.recv()).await.unwrap().unwrap()
    }

    #[test]
    fn test_backoff_is_capped() {
        let config = WatchConfig {
            retry_initial_delay: Duration::from_millis(100),
            retry_max_delay: Duration::from_millis(300),
            ..Default::default()
        };
        let second = config.next_delay(config.retry_initial_delay);
        assert_eq!(second, Duration::from_millis(200));
        assert_eq!(config.next_delay(second), Duration::from_millis(300));
    }

    #[tokio::test]
    async fn test_decodes_blocks_and_skips_malformed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let client = WatchClient::new(fast_config(port), tx, cancel.clone());
        let task = tokio::spawn(async move { client.run().await });

        let (mut server, _) = listener.accept().await.unwrap();
        server
            .write_all(
                b"Current Memory: 42%\ngarbage\nUser Time: 0.010000s\nCurrent Time: a\n\
                  Current Memory: 41%\nUser Time: 0.020000s\nCurrent Time: Wed Oct 14 09:05:03 2026\n",
            )
            .await
            .unwrap();

        assert_eq!(next_event(&mut rx).await, WatchEvent::Connected { port });
        match next_event(&mut rx).await {
            WatchEvent::Snapshot { block, .. } => {
                assert_eq!(block.metric(MetricKey::FreeMemoryPct), None);
                assert_eq!(block.metric(MetricKey::CpuUserTime), Some("0.010000s"));
            }
            other => panic!("expected snapshot, got {other:?}"),
        }
        match next_event(&mut rx).await {
            WatchEvent::Snapshot { port: p, block } => {
                assert_eq!(p, port);
                assert_eq!(block.metric(MetricKey::FreeMemoryPct), Some("41%"));
                assert_eq!(block.current_time, "Wed Oct 14 09:05:03 2026");
            }
            other => panic!("expected snapshot, got {other:?}"),
        }

        drop(server);
        assert_eq!(next_event(&mut rx).await, WatchEvent::Disconnected { port });

        cancel.cancel();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reconnects_after_server_restart() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let client = WatchClient::new(fast_config(port), tx, cancel.clone());
        let task = tokio::spawn(async move { client.run().await });

        let (first, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut rx).await, WatchEvent::Connected { port });
        drop(first);
        assert_eq!(next_event(&mut rx).await, WatchEvent::Disconnected { port });

        let (_second, _) = listener.accept().await.unwrap();
        assert_eq!(next_event(&mut rx).await, WatchEvent::Connected { port });

        cancel.cancel();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_cancel_while_retrying() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };
        let (tx, mut rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let client = WatchClient::new(fast_config(port), tx, cancel.clone());
        let task = tokio::spawn(async move { client.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
        timeout(WAIT, task).await.unwrap().unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stops_when_consumer_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);

        let client = WatchClient::new(fast_config(port), tx, CancellationToken::new());
        let task = tokio::spawn(async move { client.run().await });

        let _conn = listener.accept().await.unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();
    }
}
