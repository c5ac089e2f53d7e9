//! Destination files, one per channel per aggregator run.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};

use crate::error::AggregatorError;

/// Timestamp embedded in destination file names.
pub const FILE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Returns `<dir>/<prefix>_<YYYY-MM-DD_HH-MM-SS>.txt`.
pub fn log_file_path(dir: &Path, prefix: &str, started: DateTime<Local>) -> PathBuf {
    dir.join(format!(
        "{prefix}_{}.txt",
        started.format(FILE_TIMESTAMP_FORMAT)
    ))
}

/// An append-only record file.
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    writer: BufWriter<File>,
    records: u64,
}

impl LogFile {
    /// Opens (or creates) the file at `path` for appending.
    pub fn open(path: PathBuf) -> Result<Self, AggregatorError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AggregatorError::io(&path, e))?;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records appended through this handle.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Buffers one record followed by a newline.
    pub fn append(&mut self, record: &str) -> Result<(), AggregatorError> {
        self.writer
            .write_all(record.as_bytes())
            .and_then(|()| self.writer.write_all(b"\n"))
            .map_err(|e| AggregatorError::io(&self.path, e))?;
        self.records += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<(), AggregatorError> {
        self.writer
            .flush()
            .map_err(|e| AggregatorError::io(&self.path, e))
    }

    /// Flushes and fsyncs; used at shutdown.
    pub fn sync(&mut self) -> Result<(), AggregatorError> {
        self.flush()?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| AggregatorError::io(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_log_file_path() {
        let started = Local.with_ymd_and_hms(2026, 10, 14, 9, 5, 3).unwrap();
        let path = log_file_path(Path::new("/var/log"), "time_logs", started);
        assert_eq!(path, PathBuf::from("/var/log/time_logs_2026-10-14_09-05-03.txt"));
    }

    #[test]
    fn test_append_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("system_data_logs.txt");

        let mut file = LogFile::open(path.clone()).unwrap();
        file.append("Server started on port 8081").unwrap();
        file.append("Error: client-1 disconnected: broken pipe").unwrap();
        file.sync().unwrap();
        assert_eq!(file.records(), 2);
        drop(file);

        let mut again = LogFile::open(path.clone()).unwrap();
        again.append("Server stopped.").unwrap();
        again.flush().unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "Server started on port 8081\nError: client-1 disconnected: broken pipe\nServer stopped.\n"
        );
    }
}
