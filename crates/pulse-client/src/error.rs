//! Error types for the watch client.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()` outside tests.

use std::io;

use pulse_protocol::DecodeError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    /// Could not reach the server.
    #[error("Failed to connect to {addr}: {message}")]
    Connection { addr: String, message: String },

    /// The connection broke while reading.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The server sent a line that is not `Label: value`.
    #[error("Protocol error: {0}")]
    Decode(#[from] DecodeError),

    /// The consumer of watch events went away.
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("Cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, ClientError>;
