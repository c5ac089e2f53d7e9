//! Connected peer handles and per-peer send failures.

use std::fmt;
use std::io;

use thiserror::Error;

/// Opaque identity of a registered client.
///
/// Ids are assigned monotonically by the registry and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u64);

impl ClientId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// A connected peer owned by the registry.
///
/// Dropping the handle closes the underlying stream.
pub struct ClientHandle<S> {
    pub(crate) id: ClientId,
    pub(crate) peer: String,
    pub(crate) stream: S,
}

impl<S> ClientHandle<S> {
    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Human-readable peer address.
    pub fn peer(&self) -> &str {
        &self.peer
    }
}

impl<S> fmt::Debug for ClientHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .finish_non_exhaustive()
    }
}

/// Why a send to one peer failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The write returned an I/O error (peer closed, broken pipe, reset)
    #[error("{message}")]
    Io { kind: io::ErrorKind, message: String },

    /// The write did not complete within the registry's write timeout
    #[error("write timed out")]
    Timeout,
}

impl SendError {
    pub(crate) fn io(err: &io::Error) -> Self {
        Self::Io {
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    /// Returns true for the errors a closed peer produces.
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            SendError::Io {
                kind: io::ErrorKind::BrokenPipe
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::WriteZero,
                ..
            }
        )
    }
}

/// A peer that was evicted during a broadcast pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendFailure {
    pub client: ClientId,
    pub peer: String,
    pub error: SendError,
}

/// Result of one broadcast pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Number of peers that accepted the payload
    pub delivered: usize,
    /// Peers that failed and were removed
    pub failures: Vec<SendFailure>,
}

impl BroadcastReport {
    /// Number of peers the pass was attempted on.
    pub fn attempted(&self) -> usize {
        self.delivered + self.failures.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_id_display() {
        assert_eq!(ClientId::new(7).to_string(), "client-7");
        assert_eq!(ClientId::new(7).as_u64(), 7);
    }

    #[test]
    fn test_send_error_classification() {
        let broken = SendError::io(&io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(broken.is_disconnect());
        assert!(!SendError::Timeout.is_disconnect());
        assert_eq!(SendError::Timeout.to_string(), "write timed out");
    }

    #[test]
    fn test_report_attempted() {
        let report = BroadcastReport {
            delivered: 2,
            failures: vec![SendFailure {
                client: ClientId::new(1),
                peer: "127.0.0.1:1".to_string(),
                error: SendError::Timeout,
            }],
        };
        assert_eq!(report.attempted(), 3);
    }
}
