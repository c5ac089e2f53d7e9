//! Change detection against last-broadcast values.
//!
//! The detector is the only owner of "what clients last saw". It is created
//! once per server and driven by the broadcast loop:
//!
//! ```text
//! samples ──▶ detect() ──▶ any value differs from last broadcast?
//!                              │ no  → None (last-broadcast untouched)
//!                              │ yes → Some(Snapshot), all values advance
//! ```

use std::collections::HashMap;

use crate::metric::{MetricKey, Sample};
use crate::snapshot::Snapshot;

/// Tracks the last broadcast value of every metric.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    last_broadcast: HashMap<MetricKey, String>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares fresh samples with the last broadcast values.
    ///
    /// Returns a snapshot iff any sample differs (a key never broadcast before
    /// counts as different). On a positive result every last-broadcast value is
    /// replaced by the new sample, including the ones that did not change.
    pub fn detect(&mut self, samples: Vec<Sample>) -> Option<Snapshot> {
        let changed = samples.iter().any(|sample| {
            self.last_broadcast
                .get(&sample.key)
                .map_or(true, |last| *last != sample.value)
        });

        if !changed {
            return None;
        }

        for sample in &samples {
            self.last_broadcast
                .insert(sample.key, sample.value.clone());
        }

        Some(Snapshot::new(samples))
    }

    /// Returns the value of `key` as of the last broadcast.
    pub fn last_broadcast(&self, key: MetricKey) -> Option<&str> {
        self.last_broadcast.get(&key).map(String::as_str)
    }
}
