//! The drain loop.
//!
//! # Lifecycle
//!
//! ```text
//! open: create log dir → create/verify FIFOs → open read ends → create files
//! run:  ┌─▶ drain every channel ─▶ flush ─▶ sleep(poll) ─┐
//!       └───────────────────────────────────────────────┘
//! stop: final drain → write partial lines → fsync files
//! ```
//!
//! A read error on one channel is logged and that channel is retried on the
//! next pass. A failed file write is fatal: records would otherwise be lost
//! silently.

use chrono::Local;
use pulse_protocol::EventKind;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{AggregatorConfig, ChannelConfig};
use crate::error::AggregatorError;
use crate::fifo::{create_fifo, ChannelReader};
use crate::sink::{log_file_path, LogFile};

struct Channel {
    name: String,
    reader: ChannelReader,
    file: LogFile,
    read_failing: bool,
}

impl Channel {
    fn open(config: &ChannelConfig, file: LogFile) -> Result<Self, AggregatorError> {
        create_fifo(&config.pipe_path)?;
        let reader = ChannelReader::open(&config.pipe_path)?;

        info!(
            channel = %config.name,
            pipe = %config.pipe_path.display(),
            file = %file.path().display(),
            "Channel open"
        );

        Ok(Self {
            name: config.name.clone(),
            reader,
            file,
            read_failing: false,
        })
    }

    /// Moves every complete record from the FIFO into the file.
    fn drain(&mut self) -> Result<usize, AggregatorError> {
        let records = match self.reader.read_records() {
            Ok(records) => {
                if self.read_failing {
                    info!(channel = %self.name, "Channel readable again");
                    self.read_failing = false;
                }
                records
            }
            Err(e) => {
                if !self.read_failing {
                    warn!(channel = %self.name, error = %e, "Failed to read channel");
                    self.read_failing = true;
                }
                return Ok(0);
            }
        };

        for record in &records {
            self.write_record(record)?;
        }
        if !records.is_empty() {
            self.file.flush()?;
        }
        Ok(records.len())
    }

    fn write_record(&mut self, record: &str) -> Result<(), AggregatorError> {
        self.file.append(record)?;
        match EventKind::classify(record) {
            EventKind::Error => warn!(channel = %self.name, "{record}"),
            _ => info!(channel = %self.name, "{record}"),
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), AggregatorError> {
        if let Some(partial) = self.reader.take_partial() {
            debug!(channel = %self.name, "Writing unterminated record");
            self.write_record(&partial)?;
        }
        self.file.sync()
    }
}

/// Records written per channel over the aggregator's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSummary {
    pub name: String,
    pub file: std::path::PathBuf,
    pub records: u64,
}

/// Drains every configured channel into its destination file.
pub struct Aggregator {
    channels: Vec<Channel>,
    config: AggregatorConfig,
}

impl Aggregator {
    /// Creates the log directory, FIFOs, read endpoints and destination files.
    ///
    /// All destination files share one start timestamp.
    pub fn open(config: AggregatorConfig) -> Result<Self, AggregatorError> {
        config.validate()?;

        std::fs::create_dir_all(&config.log_dir)
            .map_err(|e| AggregatorError::io(&config.log_dir, e))?;

        let started = Local::now();
        let mut channels = Vec::with_capacity(config.channels.len());
        for channel in &config.channels {
            let file = LogFile::open(log_file_path(&config.log_dir, &channel.file_prefix, started))?;
            channels.push(Channel::open(channel, file)?);
        }

        Ok(Self { channels, config })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Runs one non-blocking pass over every channel.
    ///
    /// Returns the number of records written.
    pub fn drain(&mut self) -> Result<usize, AggregatorError> {
        let mut written = 0;
        for channel in &mut self.channels {
            written += channel.drain()?;
        }
        Ok(written)
    }

    /// Drains at the configured poll interval until `cancel_token` fires,
    /// then drains once more and closes the files.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<Vec<ChannelSummary>, AggregatorError> {
        let mut ticker = interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            channels = self.channels.len(),
            log_dir = %self.config.log_dir.display(),
            poll_ms = self.config.poll_interval_ms,
            "Aggregator started"
        );

        loop {
            tokio::select! {
                biased;

                _ = cancel_token.cancelled() => break,

                _ = ticker.tick() => {}
            }

            self.drain()?;
        }

        self.drain()?;
        let summary = self.close()?;
        info!("Aggregator stopped");
        Ok(summary)
    }

    /// Writes buffered partial records and fsyncs every file.
    pub fn close(&mut self) -> Result<Vec<ChannelSummary>, AggregatorError> {
        let mut summary = Vec::with_capacity(self.channels.len());
        for channel in &mut self.channels {
            channel.close()?;
            summary.push(ChannelSummary {
                name: channel.name.clone(),
                file: channel.file.path().to_path_buf(),
                records: channel.file.records(),
            });
        }
        Ok(summary)
    }

    /// Destination file of the channel called `name`.
    pub fn file_path(&self, name: &str) -> Option<&std::path::Path> {
        self.channels
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.file.path())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::OpenOptions;
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    fn config_in(dir: &tempfile::TempDir) -> AggregatorConfig {
        AggregatorConfig {
            log_dir: dir.path().join("logs"),
            poll_interval_ms: 10,
            channels: vec![
                ChannelConfig::new("system", dir.path().join("log_system_data"), "system_data_logs"),
                ChannelConfig::new("time", dir.path().join("log_time"), "time_logs"),
            ],
        }
    }

    fn write_to(path: &std::path::Path, bytes: &[u8]) {
        let mut pipe = OpenOptions::new()
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .unwrap();
        pipe.write_all(bytes).unwrap();
    }

    #[test]
    fn test_open_creates_dir_fifos_and_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let aggregator = Aggregator::open(config.clone()).unwrap();

        assert!(config.log_dir.is_dir());
        for channel in &config.channels {
            assert!(channel.pipe_path.exists());
        }
        let time_file = aggregator.file_path("time").unwrap();
        assert!(time_file.exists());
        let name = time_file.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("time_logs_") && name.ends_with(".txt"));
        assert!(aggregator.file_path("missing").is_none());
    }

    #[test]
    fn test_open_rejects_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = AggregatorConfig {
            channels: Vec::new(),
            ..config_in(&dir)
        };
        assert!(matches!(
            Aggregator::open(config),
            Err(AggregatorError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_drain_routes_records_per_channel() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let mut aggregator = Aggregator::open(config.clone()).unwrap();

        write_to(&config.channels[0].pipe_path, b"Server started on port 8081\n");
        write_to(&config.channels[1].pipe_path, b"Server started on port 8080\nServer stopped.\n");

        assert_eq!(aggregator.drain().unwrap(), 3);
        assert_eq!(aggregator.drain().unwrap(), 0);

        let system = std::fs::read_to_string(aggregator.file_path("system").unwrap()).unwrap();
        let time = std::fs::read_to_string(aggregator.file_path("time").unwrap()).unwrap();
        assert_eq!(system, "Server started on port 8081\n");
        assert_eq!(time, "Server started on port 8080\nServer stopped.\n");
    }

    #[test]
    fn test_close_writes_partial_record() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let mut aggregator = Aggregator::open(config.clone()).unwrap();

        write_to(&config.channels[1].pipe_path, b"complete\npartial");
        aggregator.drain().unwrap();
        let summary = aggregator.close().unwrap();

        let time = summary.iter().find(|s| s.name == "time").unwrap();
        assert_eq!(time.records, 2);
        assert_eq!(std::fs::read_to_string(&time.file).unwrap(), "complete\npartial\n");
    }

    #[tokio::test]
    async fn test_run_drains_until_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(&dir);
        let aggregator = Aggregator::open(config.clone()).unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(aggregator.run(cancel.clone()));

        write_to(&config.channels[0].pipe_path, b"Response: Current Memory: 42%\n");
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let summary = task.await.unwrap().unwrap();
        let system = summary.iter().find(|s| s.name == "system").unwrap();
        assert_eq!(system.records, 1);
    }
}
