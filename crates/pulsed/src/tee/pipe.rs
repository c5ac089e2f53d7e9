//! Non-blocking writer for the aggregator FIFO.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use pulse_protocol::LogEvent;
use thiserror::Error;

/// Largest record written in one go. Writes up to `PIPE_BUF` bytes are
/// atomic on a FIFO, so a record is never interleaved or split.
pub const MAX_RECORD_LEN: usize = libc::PIPE_BUF;

/// Why an event could not be handed to the channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TeeError {
    #[error("log channel {0} does not exist")]
    NotFound(PathBuf),

    #[error("{0} exists but is not a FIFO")]
    NotAFifo(PathBuf),

    #[error("no aggregator is reading the log channel")]
    NoReader,

    #[error("log channel is full")]
    Full,

    #[error("short write to log channel ({written} of {len} bytes)")]
    ShortWrite { written: usize, len: usize },

    #[error("log channel I/O error: {0}")]
    Io(String),
}

/// Write end of the named log channel.
///
/// Opened lazily and re-opened after a failure; never blocks.
#[derive(Debug)]
pub struct PipeWriter {
    path: PathBuf,
    file: Option<File>,
}

impl PipeWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns true while the write end is open.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Writes one event as a single newline-terminated record.
    ///
    /// Opens the FIFO first if needed. Any failure drops the event; a
    /// broken channel is closed so the next call re-opens it.
    pub fn write_event(&mut self, event: &LogEvent) -> Result<(), TeeError> {
        let record = truncate_record(event.to_line());
        let file = self.open_if_needed()?;

        match file.write(record.as_bytes()) {
            Ok(written) if written == record.len() => Ok(()),
            Ok(written) => Err(TeeError::ShortWrite {
                written,
                len: record.len(),
            }),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Err(TeeError::Full),
            Err(e) => {
                // EPIPE and friends: the reader went away.
                self.file = None;
                Err(TeeError::Io(e.to_string()))
            }
        }
    }

    /// Closes the write end.
    pub fn close(&mut self) {
        self.file = None;
    }

    fn open_if_needed(&mut self) -> Result<&mut File, TeeError> {
        if self.file.is_none() {
            self.file = Some(open_fifo_writer(&self.path)?);
        }
        self.file
            .as_mut()
            .ok_or_else(|| TeeError::Io("log channel not open".to_string()))
    }
}

fn open_fifo_writer(path: &Path) -> Result<File, TeeError> {
    let metadata = match std::fs::metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(TeeError::NotFound(path.to_path_buf()))
        }
        Err(e) => return Err(TeeError::Io(e.to_string())),
    };

    if !metadata.file_type().is_fifo() {
        return Err(TeeError::NotAFifo(path.to_path_buf()));
    }

    OpenOptions::new()
        .write(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(|e| match e.raw_os_error() {
            // Non-blocking open of a FIFO without a reader
            Some(libc::ENXIO) => TeeError::NoReader,
            _ => TeeError::Io(e.to_string()),
        })
}

/// Cuts a record to [`MAX_RECORD_LEN`] on a char boundary, keeping the
/// trailing newline.
fn truncate_record(mut record: String) -> String {
    if record.len() <= MAX_RECORD_LEN {
        return record;
    }

    let mut cut = MAX_RECORD_LEN - 1;
    while !record.is_char_boundary(cut) {
        cut -= 1;
    }
    record.truncate(cut);
    record.push('\n');
    record
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;
    use std::io::Read;
    use std::os::unix::ffi::OsStrExt;

    fn mkfifo(path: &Path) {
        let c_path = CString::new(path.as_os_str().as_bytes()).unwrap();
        // SAFETY: c_path is a valid NUL-terminated string.
        let rc = unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) };
        assert_eq!(rc, 0, "mkfifo failed");
    }

    fn open_reader(path: &Path) -> File {
        OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .unwrap()
    }

    #[test]
    fn test_missing_channel() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing");
        let mut writer = PipeWriter::new(&path);
        assert_eq!(
            writer.write_event(&LogEvent::server_stopped()),
            Err(TeeError::NotFound(path))
        );
        assert!(!writer.is_open());
    }

    #[test]
    fn test_regular_file_is_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, "").unwrap();

        let mut writer = PipeWriter::new(&path);
        assert_eq!(
            writer.write_event(&LogEvent::server_stopped()),
            Err(TeeError::NotAFifo(path.clone()))
        );
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_no_reader_drops_event() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        mkfifo(&path);

        let mut writer = PipeWriter::new(&path);
        assert_eq!(
            writer.write_event(&LogEvent::server_started(8080)),
            Err(TeeError::NoReader)
        );
        assert!(!writer.is_open());
    }

    #[test]
    fn test_writes_records_to_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        mkfifo(&path);
        let mut reader = open_reader(&path);

        let mut writer = PipeWriter::new(&path);
        writer.write_event(&LogEvent::server_started(8081)).unwrap();
        writer.write_event(&LogEvent::error("boom")).unwrap();
        assert!(writer.is_open());

        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        assert_eq!(buf, b"Server started on port 8081\nError: boom\n");
    }

    #[test]
    fn test_reopens_after_reader_returns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fifo");
        mkfifo(&path);

        let mut writer = PipeWriter::new(&path);
        let reader = open_reader(&path);
        writer.write_event(&LogEvent::server_started(1)).unwrap();
        drop(reader);

        // Reader gone: EPIPE closes the write end.
        let err = writer.write_event(&LogEvent::server_stopped()).unwrap_err();
        assert!(matches!(err, TeeError::Io(_)));
        assert!(!writer.is_open());

        let mut reader = open_reader(&path);
        writer.write_event(&LogEvent::error("back")).unwrap();
        let mut buf = Vec::new();
        let _ = reader.read_to_end(&mut buf);
        assert_eq!(buf, b"Error: back\n");
    }

    #[test]
    fn test_truncate_record() {
        let long = format!("{}\n", "é".repeat(MAX_RECORD_LEN));
        let cut = truncate_record(long);
        assert!(cut.len() <= MAX_RECORD_LEN);
        assert!(cut.ends_with('\n'));

        assert_eq!(truncate_record("short\n".to_string()), "short\n");
    }
}
