//! Log channel events.
//!
//! Every event is written to the log channel as exactly one
//! newline-terminated UTF-8 line, so the aggregator can split on `\n` and
//! treat each record independently. Embedded line breaks are flattened.

use std::fmt;

use pulse_core::Snapshot;

use crate::block::TIMESTAMP_LABEL;

const SNAPSHOT_PREFIX: &str = "Response: ";
const ERROR_PREFIX: &str = "Error: ";

/// A record handed to the log tee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEvent {
    /// A snapshot that was broadcast to clients
    Snapshot(Snapshot),
    /// Server lifecycle ("Server started on port 8081", "Client connected: ...")
    Lifecycle(String),
    /// An error report
    Error(String),
}

impl LogEvent {
    pub fn server_started(port: u16) -> Self {
        Self::Lifecycle(format!("Server started on port {port}"))
    }

    pub fn server_stopped() -> Self {
        Self::Lifecycle("Server stopped.".to_string())
    }

    pub fn client_connected(client: impl fmt::Display, peer: impl fmt::Display) -> Self {
        Self::Lifecycle(format!("Client connected: {client} ({peer})"))
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(message.into())
    }

    /// Returns the kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            LogEvent::Snapshot(_) => EventKind::Snapshot,
            LogEvent::Lifecycle(_) => EventKind::Lifecycle,
            LogEvent::Error(_) => EventKind::Error,
        }
    }

    /// Renders the event as a newline-terminated channel record.
    pub fn to_line(&self) -> String {
        let mut line = flatten(&self.to_string());
        line.push('\n');
        line
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogEvent::Snapshot(snapshot) => {
                f.write_str(SNAPSHOT_PREFIX)?;
                for sample in snapshot.entries() {
                    write!(f, "{}: {}; ", sample.key.label(), sample.value)?;
                }
                write!(f, "{TIMESTAMP_LABEL}: {}", snapshot.ctime())
            }
            LogEvent::Lifecycle(message) => f.write_str(message),
            LogEvent::Error(message) => write!(f, "{ERROR_PREFIX}{message}"),
        }
    }
}

/// Classification of a record read back from the channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Snapshot,
    Lifecycle,
    Error,
}

impl EventKind {
    /// Classifies a raw channel record by its prefix.
    pub fn classify(line: &str) -> Self {
        if line.starts_with(SNAPSHOT_PREFIX) {
            EventKind::Snapshot
        } else if line.starts_with(ERROR_PREFIX) {
            EventKind::Error
        } else {
            EventKind::Lifecycle
        }
    }
}

fn flatten(text: &str) -> String {
    text.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
