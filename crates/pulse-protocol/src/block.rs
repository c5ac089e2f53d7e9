//! Snapshot block encoding and decoding.
//!
//! A block is one `Label: value` line per metric followed by a
//! `Current Time` line, which terminates the block:
//!
//! ```text
//! Current Timezone: PST
//! Session Duration: 0h 3m 12s
//! Current Time: Tue Oct 14 09:05:03 2026
//! ```
//!
//! There is no length prefix or acknowledgement; a stream is an unbounded
//! sequence of such blocks.

use pulse_core::{MetricKey, Snapshot};
use thiserror::Error;

/// Label of the trailing timestamp line.
pub const TIMESTAMP_LABEL: &str = "Current Time";

const SEPARATOR: &str = ": ";

/// Encodes a snapshot as a wire block, sent in a single write.
pub fn encode_snapshot(snapshot: &Snapshot) -> String {
    let mut block = String::with_capacity(32 * (snapshot.len() + 1));
    for sample in snapshot.entries() {
        block.push_str(sample.key.label());
        block.push_str(SEPARATOR);
        block.push_str(&sample.value);
        block.push('\n');
    }
    block.push_str(TIMESTAMP_LABEL);
    block.push_str(SEPARATOR);
    block.push_str(&snapshot.ctime());
    block.push('\n');
    block
}

/// One `Label: value` line of a decoded block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub label: String,
    pub value: String,
}

/// A block as seen by a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotBlock {
    /// Metric lines in the order they were received
    pub fields: Vec<Field>,
    /// The ctime-style capture timestamp
    pub current_time: String,
}

impl SnapshotBlock {
    /// Returns the value of the line with `label`.
    pub fn get(&self, label: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.label == label)
            .map(|f| f.value.as_str())
    }

    /// Returns the value of a known metric.
    pub fn metric(&self, key: MetricKey) -> Option<&str> {
        self.get(key.label())
    }
}

/// Errors produced while decoding a block stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("line has no ': ' separator: {0:?}")]
    MissingSeparator(String),

    #[error("line has an empty label: {0:?}")]
    EmptyLabel(String),
}

/// Incremental, line-at-a-time block decoder.
///
/// Feed it every line read from the stream; it yields a block each time the
/// terminating `Current Time` line arrives. A malformed line discards the
/// partial block so that decoding resynchronises on the next one.
#[derive(Debug, Default)]
pub struct BlockDecoder {
    pending: Vec<Field>,
}

impl BlockDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one line (with or without its trailing newline).
    pub fn push_line(&mut self, line: &str) -> Result<Option<SnapshotBlock>, DecodeError> {
        let line = line.trim_end_matches(['\n', '\r']);
        if line.is_empty() {
            return Ok(None);
        }

        let Some((label, value)) = line.split_once(SEPARATOR) else {
            self.pending.clear();
            return Err(DecodeError::MissingSeparator(line.to_string()));
        };

        if label.trim().is_empty() {
            self.pending.clear();
            return Err(DecodeError::EmptyLabel(line.to_string()));
        }

        if label == TIMESTAMP_LABEL {
            return Ok(Some(SnapshotBlock {
                fields: std::mem::take(&mut self.pending),
                current_time: value.to_string(),
            }));
        }

        self.pending.push(Field {
            label: label.to_string(),
            value: value.to_string(),
        });
        Ok(None)
    }

    /// Returns true if a block has been started but not terminated.
    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Local, TimeZone};
    use pulse_core::Sample;

    fn time_snapshot() -> Snapshot {
        let at = Local.with_ymd_and_hms(2026, 10, 14, 9, 5, 3).single().unwrap();
        Snapshot::captured_at(
            at,
            vec![
                Sample::new(MetricKey::Timezone, "PST"),
                Sample::new(MetricKey::SessionDuration, "0h 3m 12s"),
            ],
        )
    }

    #[test]
    fn test_encode_snapshot() {
        assert_eq!(
            encode_snapshot(&time_snapshot()),
            "Current Timezone: PST\nSession Duration: 0h 3m 12s\nCurrent Time: Wed Oct 14 09:05:03 2026\n"
        );
    }

    #[test]
    fn test_decode_encoded_block() {
        let encoded = encode_snapshot(&time_snapshot());
        let mut decoder = BlockDecoder::new();
        let mut blocks = Vec::new();
        for line in encoded.lines() {
            if let Some(block) = decoder.push_line(line).unwrap() {
                blocks.push(block);
            }
        }

        assert_eq!(blocks.len(), 1);
        let block = &blocks[0];
        assert_eq!(block.metric(MetricKey::Timezone), Some("PST"));
        assert_eq!(block.get("Session Duration"), Some("0h 3m 12s"));
        assert_eq!(block.current_time, "Wed Oct 14 09:05:03 2026");
        assert!(!decoder.has_partial());
    }

    #[test]
    fn test_value_may_contain_separator() {
        let mut decoder = BlockDecoder::new();
        decoder.push_line("Note: a: b\r\n").unwrap();
        let block = decoder.push_line("Current Time: now").unwrap().unwrap();
        assert_eq!(block.get("Note"), Some("a: b"));
    }

    #[test]
    fn test_malformed_line_resynchronises() {
        let mut decoder = BlockDecoder::new();
        decoder.push_line("Current Memory: 41%").unwrap();
        assert!(matches!(
            decoder.push_line("garbage"),
            Err(DecodeError::MissingSeparator(_))
        ));
        assert!(!decoder.has_partial());

        decoder.push_line("Current Memory: 42%").unwrap();
        let block = decoder.push_line("Current Time: now").unwrap().unwrap();
        assert_eq!(block.fields.len(), 1);
        assert_eq!(block.metric(MetricKey::FreeMemoryPct), Some("42%"));
    }

    #[test]
    fn test_empty_label_rejected() {
        let mut decoder = BlockDecoder::new();
        assert_eq!(
            decoder.push_line(": value"),
            Err(DecodeError::EmptyLabel(": value".to_string()))
        );
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut decoder = BlockDecoder::new();
        assert_eq!(decoder.push_line(""), Ok(None));
        assert_eq!(decoder.push_line("\n"), Ok(None));
    }
}
