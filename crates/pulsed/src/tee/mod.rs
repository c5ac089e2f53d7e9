//! Best-effort log tee towards the aggregator process.
//!
//! Events flow through two hops, both of which may drop:
//!
//! ```text
//! ┌───────────┐ try_send ┌──────────────┐ O_NONBLOCK ┌──────────┐
//! │ TeeHandle │─────────▶│ tee writer   │───────────▶│   FIFO   │──▶ pulse-logd
//! │ (clones)  │  bounded │ (PipeWriter) │   write    │ /tmp/... │
//! └───────────┘   mpsc   └──────────────┘            └──────────┘
//! ```
//!
//! - The in-process queue is bounded; a full queue drops the event.
//! - The writer task is the only owner of the FIFO endpoint in the process.
//! - If no aggregator is reading, the FIFO cannot be opened and the event is
//!   dropped; the next event tries again.
//!
//! Durability guarantee: none. Events emitted while the channel is unopened
//! or full are lost. Within one producer, delivered events keep their
//! emission order.

mod pipe;

pub use pipe::{PipeWriter, TeeError, MAX_RECORD_LEN};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use pulse_protocol::LogEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Producer side of the log tee. Cheap to clone; never blocks.
#[derive(Debug, Clone)]
pub struct TeeHandle {
    sender: Option<mpsc::Sender<LogEvent>>,
    queue_dropped: Arc<AtomicU64>,
}

impl TeeHandle {
    /// Wraps an existing queue sender.
    pub fn new(sender: mpsc::Sender<LogEvent>) -> Self {
        Self {
            sender: Some(sender),
            queue_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    /// A handle that discards everything (tee disabled).
    pub fn disabled() -> Self {
        Self {
            sender: None,
            queue_dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Queues an event for the log channel.
    ///
    /// Returns false if the event was dropped.
    pub fn emit(&self, event: LogEvent) -> bool {
        let Some(sender) = &self.sender else {
            return false;
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                let dropped = self.queue_dropped.fetch_add(1, Ordering::Relaxed) + 1;
                debug!(dropped, "Log tee queue full, dropping event");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Log tee writer stopped, dropping event");
                false
            }
        }
    }

    /// Number of events dropped because the in-process queue was full.
    pub fn queue_dropped(&self) -> u64 {
        self.queue_dropped.load(Ordering::Relaxed)
    }
}

/// Counters reported by the tee writer when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TeeStats {
    /// Events written to the FIFO
    pub written: u64,
    /// Events dropped at the FIFO (no reader, full, I/O error)
    pub dropped: u64,
}

/// Spawns the tee writer task for the FIFO at `path`.
///
/// The task runs until every [`TeeHandle`] clone is dropped, writes what is
/// still queued, then closes the FIFO and returns its counters.
pub fn spawn_tee(path: impl Into<PathBuf>, queue: usize) -> (TeeHandle, JoinHandle<TeeStats>) {
    let (sender, receiver) = mpsc::channel(queue.max(1));
    let writer = PipeWriter::new(path);
    let task = tokio::spawn(run_writer(writer, receiver));
    (TeeHandle::new(sender), task)
}

async fn run_writer(mut writer: PipeWriter, mut receiver: mpsc::Receiver<LogEvent>) -> TeeStats {
    let mut stats = TeeStats::default();
    let mut available = true;

    debug!(path = %writer.path().display(), "Log tee writer started");

    while let Some(event) = receiver.recv().await {
        match writer.write_event(&event) {
            Ok(()) => {
                stats.written += 1;
                if !available {
                    info!(path = %writer.path().display(), "Log channel available again");
                    available = true;
                }
            }
            Err(e) => {
                stats.dropped += 1;
                if available {
                    warn!(
                        path = %writer.path().display(),
                        error = %e,
                        "Log channel unavailable, dropping events"
                    );
                    available = false;
                } else {
                    debug!(error = %e, "Dropped log event");
                }
            }
        }
    }

    writer.close();
    debug!(
        written = stats.written,
        dropped = stats.dropped,
        "Log tee writer stopped"
    );
    stats
}
