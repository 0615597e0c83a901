use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use cadence_types::{AgentId, Clock, SystemClock};

use crate::entry::{LogEntry, LogPayload};
use crate::error::LogError;
use crate::sink::{read_jsonl, JsonlSink, LogSink, SyncMode};

struct LogInner {
    entries: Vec<Arc<LogEntry>>,
    next_seq: u64,
    sink: Option<Box<dyn LogSink>>,
}

/// Append-only, monotonically sequenced execution log.
///
/// `busSeq` is assigned under the append lock, so sequence order equals
/// append order across every agent. There is no update or delete.
pub struct ExecutionLog {
    inner: Mutex<LogInner>,
    clock: Arc<dyn Clock>,
}

impl ExecutionLog {
    /// Empty in-memory log stamped by the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(LogInner {
                entries: Vec::new(),
                next_seq: 1,
                sink: None,
            }),
            clock,
        }
    }

    /// Attach a durability sink. Subsequent appends go through it.
    pub fn with_sink(self, sink: Box<dyn LogSink>) -> Self {
        if let Ok(mut inner) = self.inner.lock() {
            inner.sink = Some(sink);
        }
        self
    }

    /// In-memory log over previously recorded entries.
    ///
    /// Entries must have strictly increasing `busSeq`. The counter resumes at
    /// one past the maximum.
    pub fn from_entries(entries: Vec<LogEntry>) -> Result<Self, LogError> {
        Self::from_entries_with_clock(entries, Arc::new(SystemClock))
    }

    pub fn from_entries_with_clock(
        entries: Vec<LogEntry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, LogError> {
        let mut previous = 0u64;
        for entry in &entries {
            if entry.bus_seq <= previous {
                return Err(LogError::OutOfOrder {
                    previous,
                    found: entry.bus_seq,
                });
            }
            previous = entry.bus_seq;
        }
        let log = Self::with_clock(clock);
        {
            let mut inner = log.inner.lock().map_err(|_| LogError::LockPoisoned)?;
            inner.next_seq = previous + 1;
            inner.entries = entries.into_iter().map(Arc::new).collect();
        }
        Ok(log)
    }

    /// Reload a JSON Lines log (if present) and keep appending to the same file.
    pub fn open_jsonl(path: impl AsRef<Path>, sync: SyncMode) -> Result<Self, LogError> {
        let path = path.as_ref();
        let entries = if path.exists() {
            read_jsonl(path)?
        } else {
            Vec::new()
        };
        let restored = entries.len();
        let log = Self::from_entries(entries)?;
        let sink = JsonlSink::open(path, sync)?;
        info!(
            path = %path.display(),
            entries = restored,
            next_seq = log.next_seq(),
            "Execution log opened"
        );
        Ok(log.with_sink(Box::new(sink)))
    }

    /// Append a new entry, assigning the next sequence number.
    ///
    /// The sink (if any) sees the entry first. If it fails, nothing is
    /// stored and the sequence number is not consumed.
    pub fn append(&self, agent_id: &AgentId, payload: LogPayload) -> Result<Arc<LogEntry>, LogError> {
        let mut inner = self.inner.lock().map_err(|_| LogError::LockPoisoned)?;
        let entry = LogEntry {
            agent_id: agent_id.clone(),
            timestamp: self.clock.now_ms(),
            bus_seq: inner.next_seq,
            payload,
        };
        if let Some(sink) = inner.sink.as_mut() {
            sink.write_entry(&entry)?;
        }
        inner.next_seq += 1;
        let entry = Arc::new(entry);
        inner.entries.push(entry.clone());
        debug!(
            agent = %entry.agent_id,
            seq = entry.bus_seq,
            kind = %entry.kind(),
            "Log entry appended"
        );
        Ok(entry)
    }

    /// Snapshot of every entry in sequence order.
    pub fn entries(&self) -> Vec<Arc<LogEntry>> {
        self.inner
            .lock()
            .map(|inner| inner.entries.clone())
            .unwrap_or_default()
    }

    /// Snapshot of one agent's entries in sequence order.
    pub fn entries_for_agent(&self, agent_id: &AgentId) -> Vec<Arc<LogEntry>> {
        self.inner
            .lock()
            .map(|inner| {
                inner
                    .entries
                    .iter()
                    .filter(|e| &e.agent_id == agent_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Entries with `after < busSeq <= up_to`, in sequence order.
    pub fn entries_between(&self, after: u64, up_to: u64) -> Vec<Arc<LogEntry>> {
        self.inner
            .lock()
            .map(|inner| {
                let start = inner.entries.partition_point(|e| e.bus_seq <= after);
                let end = inner.entries.partition_point(|e| e.bus_seq <= up_to);
                inner.entries[start..end.max(start)].to_vec()
            })
            .unwrap_or_default()
    }

    /// First entry matching `predicate`, in sequence order.
    pub fn find<F>(&self, predicate: F) -> Option<Arc<LogEntry>>
    where
        F: Fn(&LogEntry) -> bool,
    {
        let inner = self.inner.lock().ok()?;
        inner.entries.iter().find(|e| predicate(e)).cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The sequence number the next append will receive.
    pub fn next_seq(&self) -> u64 {
        self.inner.lock().map(|i| i.next_seq).unwrap_or(0)
    }

    pub fn now_ms(&self) -> u64 {
        self.clock.now_ms()
    }

    pub fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone()
    }

    /// Flush the attached sink's buffers.
    pub fn flush(&self) -> Result<(), LogError> {
        let mut inner = self.inner.lock().map_err(|_| LogError::LockPoisoned)?;
        match inner.sink.as_mut() {
            Some(sink) => sink.flush(),
            None => Ok(()),
        }
    }
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}
