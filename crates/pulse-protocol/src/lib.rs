//! pulse protocol - text formats shared by servers, clients and the aggregator
//!
//! Two formats live here:
//! - `block` - the `Label: value` snapshot blocks streamed to TCP clients
//! - `event` - the one-line-per-event records written to the log channel

pub mod block;
pub mod event;

pub use block::{encode_snapshot, BlockDecoder, DecodeError, Field, SnapshotBlock, TIMESTAMP_LABEL};
pub use event::{EventKind, LogEvent};
