//! pulse core - shared domain types for the telemetry servers
//!
//! This crate provides the types shared between the telemetry servers
//! (`pulsed`), the log aggregator (`pulse-logd`) and the watch client:
//! - `metric` - tracked metric keys and their wire labels
//! - `snapshot` - immutable, timestamped bundles of metric values
//! - `detector` - last-broadcast bookkeeping and change detection
//! - `sampler` - the metric sources polled once per tick
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod detector;
pub mod error;
pub mod metric;
pub mod sampler;
pub mod snapshot;

// Re-exports for convenience
pub use detector::ChangeDetector;
pub use error::{DomainError, DomainResult};
pub use metric::{MetricKey, Sample, UNAVAILABLE};
pub use sampler::{Sampler, SystemSampler, TimeSampler};
pub use snapshot::Snapshot;
