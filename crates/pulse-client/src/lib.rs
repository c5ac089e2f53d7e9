//! pulse watch client
//!
//! Connects to one telemetry server, decodes its snapshot blocks and
//! forwards them as [`WatchEvent`]s. Reconnects with exponential backoff
//! until cancelled.

pub mod client;
pub mod error;

pub use client::{WatchClient, WatchConfig, WatchEvent};
pub use error::{ClientError, Result};
