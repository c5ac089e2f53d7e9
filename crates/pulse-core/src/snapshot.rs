//! Immutable snapshots of metric values.

use chrono::{DateTime, Local};

use crate::metric::{MetricKey, Sample};

/// `ctime(3)`-style timestamp format, e.g. `Tue Oct 14 09:05:03 2026`.
pub const CTIME_FORMAT: &str = "%a %b %e %H:%M:%S %Y";

/// One timestamped bundle of every tracked metric.
///
/// Built by the [`ChangeDetector`](crate::ChangeDetector) when a broadcast
/// is warranted; the same snapshot is sent to clients and to the log tee.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    captured_at: DateTime<Local>,
    entries: Vec<Sample>,
}

impl Snapshot {
    /// Creates a snapshot captured now.
    pub fn new(entries: Vec<Sample>) -> Self {
        Self::captured_at(Local::now(), entries)
    }

    /// Creates a snapshot with an explicit capture time.
    pub fn captured_at(captured_at: DateTime<Local>, entries: Vec<Sample>) -> Self {
        Self {
            captured_at,
            entries,
        }
    }

    /// Returns the capture timestamp.
    pub fn timestamp(&self) -> DateTime<Local> {
        self.captured_at
    }

    /// Returns the capture timestamp in ctime style.
    pub fn ctime(&self) -> String {
        self.captured_at.format(CTIME_FORMAT).to_string()
    }

    /// Returns the (key, value) pairs in sampling order.
    pub fn entries(&self) -> &[Sample] {
        &self.entries
    }

    /// Returns the value recorded for `key`, if present.
    pub fn get(&self, key: MetricKey) -> Option<&str> {
        self.entries
            .iter()
            .find(|s| s.key == key)
            .map(|s| s.value.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ctime_format() {
        let at = Local.with_ymd_and_hms(2026, 10, 4, 9, 5, 3).single().unwrap();
        let snapshot = Snapshot::captured_at(at, Vec::new());
        assert_eq!(snapshot.ctime(), "Sun Oct  4 09:05:03 2026");
    }

    #[test]
    fn test_get_by_key() {
        let snapshot = Snapshot::new(vec![
            Sample::new(MetricKey::Timezone, "UTC"),
            Sample::new(MetricKey::SessionDuration, "0h 0m 1s"),
        ]);
        assert_eq!(snapshot.get(MetricKey::Timezone), Some("UTC"));
        assert_eq!(snapshot.get(MetricKey::CpuUserTime), None);
        assert_eq!(snapshot.len(), 2);
    }
}
