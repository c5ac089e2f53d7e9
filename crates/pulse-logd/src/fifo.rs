//! FIFO creation and the non-blocking read endpoint.
//!
//! The read endpoint is opened `O_RDONLY | O_NONBLOCK` so opening never
//! waits for a writer, and it stays open for the aggregator's lifetime.
//! Once it is open, servers can open their write ends; events a server
//! emitted earlier were dropped on its side.

use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{FileTypeExt, OpenOptionsExt};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AggregatorError;

/// Permission bits for created FIFOs; any local server may write.
const FIFO_MODE: libc::mode_t = 0o666;

const READ_CHUNK: usize = 4096;

/// Longest unterminated line kept in memory. Longer runs without a newline
/// are split into records of this size.
pub const MAX_PENDING: usize = 4 * READ_CHUNK;

/// Creates a FIFO at `path`. An existing FIFO is reused.
///
/// # Errors
///
/// - `AggregatorError::NotAFifo` if something else already lives at `path`
/// - `AggregatorError::CreateFifo` if `mkfifo` fails for another reason
pub fn create_fifo(path: &Path) -> Result<(), AggregatorError> {
    let c_path = CString::new(path.as_os_str().as_bytes()).map_err(|e| {
        AggregatorError::CreateFifo {
            path: path.to_path_buf(),
            source: io::Error::new(io::ErrorKind::InvalidInput, e),
        }
    })?;

    // SAFETY: c_path is a valid NUL-terminated string for the duration of the call.
    let rc = unsafe { libc::mkfifo(c_path.as_ptr(), FIFO_MODE) };
    if rc == 0 {
        debug!(path = %path.display(), "Created FIFO");
        return Ok(());
    }

    let error = io::Error::last_os_error();
    if error.kind() != io::ErrorKind::AlreadyExists {
        return Err(AggregatorError::CreateFifo {
            path: path.to_path_buf(),
            source: error,
        });
    }

    let metadata = std::fs::metadata(path).map_err(|e| AggregatorError::io(path, e))?;
    if metadata.file_type().is_fifo() {
        Ok(())
    } else {
        Err(AggregatorError::NotAFifo(path.to_path_buf()))
    }
}

/// Read end of one log FIFO with line reassembly.
#[derive(Debug)]
pub struct ChannelReader {
    path: PathBuf,
    file: File,
    pending: Vec<u8>,
}

impl ChannelReader {
    /// Opens the read end of the FIFO at `path` without blocking.
    pub fn open(path: &Path) -> Result<Self, AggregatorError> {
        let file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(path)
            .map_err(|e| AggregatorError::io(path, e))?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            pending: Vec::new(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads everything currently buffered in the FIFO and returns the
    /// complete records, without their trailing newline. Empty lines are
    /// records too.
    ///
    /// Returns immediately when the FIFO is empty or has no writer.
    pub fn read_records(&mut self) -> io::Result<Vec<String>> {
        let mut chunk = [0u8; READ_CHUNK];
        let mut records = Vec::new();

        loop {
            match self.file.read(&mut chunk) {
                // No writer attached, or all writers closed.
                Ok(0) => break,
                Ok(n) => {
                    self.pending.extend_from_slice(&chunk[..n]);
                    records.extend(self.take_complete_lines());
                    self.split_oversized(&mut records);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(records)
    }

    /// Returns the buffered partial line, if any, emptying the buffer.
    pub fn take_partial(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let partial = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(partial)
    }

    pub fn has_partial(&self) -> bool {
        !self.pending.is_empty()
    }

    fn take_complete_lines(&mut self) -> Vec<String> {
        let Some(last_newline) = self.pending.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };

        let rest = self.pending.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.pending, rest);

        // `complete` ends with a newline, so every piece does too.
        complete
            .split_inclusive(|&b| b == b'\n')
            .map(|line| {
                let line = line.strip_suffix(b"\n").unwrap_or(line);
                String::from_utf8_lossy(line).into_owned()
            })
            .collect()
    }

    fn split_oversized(&mut self, records: &mut Vec<String>) {
        while self.pending.len() >= MAX_PENDING {
            let head: Vec<u8> = self.pending.drain(..MAX_PENDING).collect();
            debug!(path = %self.path.display(), len = head.len(), "Splitting unterminated record");
            records.push(String::from_utf8_lossy(&head).into_owned());
        }
    }
}
