//! Aggregator configuration.
//!
//! Defaults mirror the two servers: the system channel drains
//! `/tmp/log_system_data` into `system_data_logs_<ts>.txt` and the time
//! channel drains `/tmp/log_time` into `time_logs_<ts>.txt`.
//!
//! Layers, later wins: defaults, the `[logd]` table of `pulse.toml`,
//! `PULSE_LOG_DIR`, then command-line flags.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::AggregatorError;

/// Delay between drain passes.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

/// Environment variable overriding the log directory.
pub const ENV_LOG_DIR: &str = "PULSE_LOG_DIR";

/// Returns `$XDG_STATE_HOME/pulse` (or the platform equivalent), falling
/// back to `/tmp/pulse`.
pub fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .map(|dir| dir.join("pulse"))
        .unwrap_or_else(|| PathBuf::from("/tmp/pulse"))
}

/// One FIFO and the file it is drained into.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelConfig {
    /// Name used in console output ("system", "time")
    pub name: String,
    pub pipe_path: PathBuf,
    /// Destination file name prefix; the start timestamp is appended
    pub file_prefix: String,
}

impl ChannelConfig {
    pub fn new(name: &str, pipe_path: impl Into<PathBuf>, file_prefix: &str) -> Self {
        Self {
            name: name.to_string(),
            pipe_path: pipe_path.into(),
            file_prefix: file_prefix.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AggregatorConfig {
    pub log_dir: PathBuf,
    pub poll_interval_ms: u64,
    pub channels: Vec<ChannelConfig>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            channels: vec![
                ChannelConfig::new("system", "/tmp/log_system_data", "system_data_logs"),
                ChannelConfig::new("time", "/tmp/log_time", "time_logs"),
            ],
        }
    }
}

/// Shape of `pulse.toml` as seen by the aggregator; server tables are ignored.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    logd: AggregatorConfig,
}

impl AggregatorConfig {
    /// Parses the `[logd]` table of a `pulse.toml` document.
    pub fn from_toml_str(contents: &str) -> Result<Self, AggregatorError> {
        let file: ConfigFile =
            toml::from_str(contents).map_err(|e| AggregatorError::ConfigParse(e.to_string()))?;
        Ok(file.logd)
    }

    pub fn from_file(path: &Path) -> Result<Self, AggregatorError> {
        let contents = std::fs::read_to_string(path).map_err(|e| AggregatorError::ConfigIo {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Applies `PULSE_LOG_DIR` from `lookup`.
    #[must_use]
    pub fn with_env<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dir) = lookup(ENV_LOG_DIR).filter(|d| !d.trim().is_empty()) {
            self.log_dir = PathBuf::from(dir);
        }
        self
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn validate(&self) -> Result<(), AggregatorError> {
        if self.poll_interval_ms == 0 {
            return Err(AggregatorError::InvalidConfig(
                "poll_interval_ms must be > 0".to_string(),
            ));
        }
        if self.channels.is_empty() {
            return Err(AggregatorError::InvalidConfig(
                "at least one channel is required".to_string(),
            ));
        }

        let mut pipes = HashSet::new();
        let mut prefixes = HashSet::new();
        for channel in &self.channels {
            if channel.file_prefix.is_empty() {
                return Err(AggregatorError::InvalidConfig(format!(
                    "channel {} has an empty file_prefix",
                    channel.name
                )));
            }
            if !pipes.insert(&channel.pipe_path) {
                return Err(AggregatorError::InvalidConfig(format!(
                    "pipe {} is used by more than one channel",
                    channel.pipe_path.display()
                )));
            }
            if !prefixes.insert(&channel.file_prefix) {
                return Err(AggregatorError::InvalidConfig(format!(
                    "file prefix {} is used by more than one channel",
                    channel.file_prefix
                )));
            }
        }
        Ok(())
    }
}
