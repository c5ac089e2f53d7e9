//! pulse log aggregator - drains the server FIFOs into durable files
//!
//! - `config` - channel table, log directory, poll interval
//! - `fifo` - FIFO creation and the non-blocking read endpoint
//! - `sink` - timestamped destination files
//! - `aggregator` - the polling drain loop
//!
//! # Architecture
//!
//! ```text
//! /tmp/log_system_data ──▶ ChannelReader ──▶ LogFile system_data_logs_<ts>.txt
//!                              │
//! /tmp/log_time ─────────▶ ChannelReader ──▶ LogFile time_logs_<ts>.txt
//!                              │
//!                              └──▶ tracing (operational console)
//! ```
//!
//! One polling loop visits every channel each pass. Records are
//! newline-delimited; a partial line stays buffered until its newline
//! arrives.

pub mod aggregator;
pub mod config;
pub mod error;
pub mod fifo;
pub mod sink;

pub use aggregator::{Aggregator, ChannelSummary};
pub use config::{AggregatorConfig, ChannelConfig};
pub use error::AggregatorError;
pub use fifo::{create_fifo, ChannelReader};
pub use sink::LogFile;
