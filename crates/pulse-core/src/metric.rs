//! Tracked metrics and sampled values.

use std::fmt;
use std::str::FromStr;

use crate::error::DomainError;

/// Sentinel value reported when a metric source is unavailable.
///
/// Sampling never fails: a source that cannot be read produces this value
/// and change detection treats it like any other string.
pub const UNAVAILABLE: &str = "N/A";

/// Semantic key of a tracked metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricKey {
    /// Abbreviated local timezone name (e.g. "UTC", "PST")
    Timezone,
    /// Time since the server started, "Xh Ym Zs"
    SessionDuration,
    /// Free (available) memory as a whole percentage of total
    FreeMemoryPct,
    /// User-mode CPU time consumed by the server process
    CpuUserTime,
}

impl MetricKey {
    /// Every key, in wire order.
    pub const ALL: [MetricKey; 4] = [
        MetricKey::Timezone,
        MetricKey::SessionDuration,
        MetricKey::FreeMemoryPct,
        MetricKey::CpuUserTime,
    ];

    /// Returns the stable machine name of the key.
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKey::Timezone => "timezone",
            MetricKey::SessionDuration => "session_duration",
            MetricKey::FreeMemoryPct => "free_memory_pct",
            MetricKey::CpuUserTime => "cpu_user_time",
        }
    }

    /// Returns the human-readable label used on the wire.
    pub fn label(&self) -> &'static str {
        match self {
            MetricKey::Timezone => "Current Timezone",
            MetricKey::SessionDuration => "Session Duration",
            MetricKey::FreeMemoryPct => "Current Memory",
            MetricKey::CpuUserTime => "User Time",
        }
    }

    /// Looks a key up by its wire label.
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|key| key.label() == label)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKey {
    type Err = DomainError;

    /// Accepts either the machine name or the wire label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .or_else(|| Self::from_label(s))
            .ok_or_else(|| DomainError::UnknownMetric(s.to_string()))
    }
}

/// One sampled metric value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub key: MetricKey,
    pub value: String,
}

impl Sample {
    /// Creates a new sample.
    pub fn new(key: MetricKey, value: impl Into<String>) -> Self {
        Self {
            key,
            value: value.into(),
        }
    }

    /// Creates a sample carrying the `N/A` sentinel.
    pub fn unavailable(key: MetricKey) -> Self {
        Self::new(key, UNAVAILABLE)
    }

    /// Returns true if the source could not be read.
    pub fn is_unavailable(&self) -> bool {
        self.value == UNAVAILABLE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_labels_round_trip() {
        for key in MetricKey::ALL {
            assert_eq!(MetricKey::from_label(key.label()), Some(key));
        }
        assert_eq!(MetricKey::from_label("Current Time"), None);
    }

    #[test]
    fn test_from_str_accepts_name_and_label() {
        assert_eq!("timezone".parse::<MetricKey>(), Ok(MetricKey::Timezone));
        assert_eq!("User Time".parse::<MetricKey>(), Ok(MetricKey::CpuUserTime));
        assert_eq!(
            "load_avg".parse::<MetricKey>(),
            Err(DomainError::UnknownMetric("load_avg".to_string()))
        );
    }

    #[test]
    fn test_unavailable_sample() {
        let sample = Sample::unavailable(MetricKey::FreeMemoryPct);
        assert!(sample.is_unavailable());
        assert_eq!(sample.value, "N/A");
        assert!(!Sample::new(MetricKey::FreeMemoryPct, "42%").is_unavailable());
    }
}
