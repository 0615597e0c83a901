use std::fs::{File, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::entry::LogEntry;
use crate::error::LogError;

/// Durability decorator for [`crate::ExecutionLog::append`].
///
/// `write_entry` is called while the log holds its append lock and before
/// the entry becomes visible. An error aborts the append.
pub trait LogSink: Send {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<(), LogError>;

    fn flush(&mut self) -> Result<(), LogError> {
        Ok(())
    }
}

/// When a [`JsonlSink`] pushes bytes to disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync after every entry.
    #[default]
    Immediate,
    /// Hand every entry to the OS, no fsync.
    Flush,
    /// Leave syncing to the OS until an explicit flush.
    OsManaged,
}

/// The file operations a [`JsonlSink`] relies on.
pub trait SegmentFile: Write + Send {
    fn sync_data(&mut self) -> io::Result<()>;

    /// Cut the segment back to `len` bytes.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl SegmentFile for File {
    fn sync_data(&mut self) -> io::Result<()> {
        File::sync_data(self)
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Appends each entry as one JSON line.
///
/// A line is written with a single unbuffered `write_all`. When the write or
/// the sync fails, the segment is truncated to its length before the append,
/// so a failed append never leaves a partial line behind.
pub struct JsonlSink<F: SegmentFile = File> {
    path: Option<PathBuf>,
    segment: F,
    len: u64,
    sync: SyncMode,
}

impl JsonlSink<File> {
    /// Open `path` for appending, creating it if missing.
    pub fn open(path: impl AsRef<Path>, sync: SyncMode) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let len = file.metadata()?.len();
        debug!(path = %path.display(), len, ?sync, "JSONL sink opened");
        Ok(Self {
            path: Some(path),
            segment: file,
            len,
            sync,
        })
    }
}

impl<F: SegmentFile> JsonlSink<F> {
    /// Sink over an already opened segment holding `len` bytes.
    pub fn with_segment(segment: F, len: u64, sync: SyncMode) -> Self {
        Self {
            path: None,
            segment,
            len,
            sync,
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Bytes of complete lines written so far.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn write_line(&mut self, line: &[u8]) -> io::Result<()> {
        self.segment.write_all(line)?;
        if self.sync == SyncMode::Immediate {
            self.segment.sync_data()?;
        }
        Ok(())
    }
}

impl<F: SegmentFile> LogSink for JsonlSink<F> {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<(), LogError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        if let Err(e) = self.write_line(&line) {
            if let Err(truncate) = self.segment.truncate(self.len) {
                error!(
                    len = self.len,
                    error = %truncate,
                    "Failed to truncate JSONL segment after a failed append"
                );
            }
            return Err(e.into());
        }
        self.len += line.len() as u64;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LogError> {
        self.segment.flush()?;
        self.segment.sync_data()?;
        Ok(())
    }
}

/// In-memory sink holding serialized lines. Clones share the same buffer.
#[derive(Clone, Default)]
pub struct MemorySink {
    lines: Arc<Mutex<Vec<String>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> Vec<String> {
        self.lines
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl LogSink for MemorySink {
    fn write_entry(&mut self, entry: &LogEntry) -> Result<(), LogError> {
        let line = serde_json::to_string(entry)?;
        self.lines
            .lock()
            .map_err(|_| LogError::LockPoisoned)?
            .push(line);
        Ok(())
    }
}

/// Load every entry of a JSON Lines file, in file order.
///
/// Blank lines are skipped. A line that is not a valid entry fails with
/// [`LogError::Corrupt`] carrying its 1-based line number.
pub fn read_jsonl(path: impl AsRef<Path>) -> Result<Vec<LogEntry>, LogError> {
    let file = File::open(path.as_ref())?;
    let mut entries = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let entry: LogEntry = serde_json::from_str(&line).map_err(|e| LogError::Corrupt {
            line: index + 1,
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}
