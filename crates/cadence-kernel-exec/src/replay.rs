use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use cadence_kernel_log::{ExecutionLog, LogEntry, LogPayload};
use cadence_types::{canonical_eq, canonical_json, AgentId, KernelMode, TickOutput};

use crate::error::ReplayError;

/// One agent's recorded ticks and tool outcomes, keyed by tick sequence
/// number. When the log holds several entries for one sequence number the
/// first wins.
#[derive(Debug, Default)]
pub struct AgentTrace {
    ticks: BTreeMap<u64, Arc<LogEntry>>,
    tool_outcomes: HashMap<u64, Arc<LogEntry>>,
}

impl AgentTrace {
    pub fn from_entries(entries: impl IntoIterator<Item = Arc<LogEntry>>) -> Self {
        let mut trace = Self::default();
        for entry in entries {
            let seq = match &entry.payload {
                LogPayload::TickOutput(tick) => {
                    trace.ticks.entry(tick.sequence_number).or_insert(entry);
                    continue;
                }
                LogPayload::ToolResult(record) => record.sequence_number,
                LogPayload::ToolError(record) => record.sequence_number,
                _ => continue,
            };
            trace.tool_outcomes.entry(seq).or_insert(entry);
        }
        trace
    }

    /// The `TICK_OUTPUT` entry at `sequence_number`.
    pub fn tick(&self, sequence_number: u64) -> Option<&Arc<LogEntry>> {
        self.ticks.get(&sequence_number)
    }

    pub fn first_tick(&self) -> Option<&Arc<LogEntry>> {
        self.ticks.values().next()
    }

    /// The first recorded tick with a sequence number above `sequence_number`.
    pub fn tick_after(&self, sequence_number: u64) -> Option<&Arc<LogEntry>> {
        self.ticks
            .range((Bound::Excluded(sequence_number), Bound::Unbounded))
            .next()
            .map(|(_, entry)| entry)
    }

    /// The `TOOL_RESULT` or `TOOL_ERROR` entry of the call made at `sequence_number`.
    pub fn tool_outcome(&self, sequence_number: u64) -> Option<&Arc<LogEntry>> {
        self.tool_outcomes.get(&sequence_number)
    }

    /// Number of recorded ticks.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}

/// [`AgentTrace`]s built on first use, one scan of the log per agent.
///
/// Only valid while the log does not grow, which holds in REPLAY.
pub struct TraceIndex {
    log: Arc<ExecutionLog>,
    traces: Mutex<HashMap<AgentId, Arc<AgentTrace>>>,
}

impl TraceIndex {
    pub fn new(log: Arc<ExecutionLog>) -> Self {
        Self {
            log,
            traces: Mutex::new(HashMap::new()),
        }
    }

    pub fn trace(&self, agent: &AgentId) -> Arc<AgentTrace> {
        let mut traces = self.traces.lock().unwrap_or_else(|e| e.into_inner());
        traces
            .entry(agent.clone())
            .or_insert_with(|| {
                let trace = AgentTrace::from_entries(self.log.entries_for_agent(agent));
                debug!(agent = %agent, ticks = trace.len(), "Agent trace indexed");
                Arc::new(trace)
            })
            .clone()
    }
}

/// Checks re-executed ticks against recorded `TICK_OUTPUT` entries.
///
/// Output and hash comparisons share the canonical JSON form from
/// `cadence_types::canonical`.
pub struct ReplayController {
    index: TraceIndex,
    mode: KernelMode,
}

impl ReplayController {
    pub fn new(log: Arc<ExecutionLog>, mode: KernelMode) -> Self {
        Self {
            index: TraceIndex::new(log),
            mode,
        }
    }

    pub fn mode(&self) -> KernelMode {
        self.mode
    }

    /// Everything recorded for `agent`. Indexed once in REPLAY; read fresh
    /// in LIVE, where the log keeps growing.
    pub fn trace(&self, agent: &AgentId) -> Arc<AgentTrace> {
        if self.mode.is_replay() {
            self.index.trace(agent)
        } else {
            Arc::new(AgentTrace::from_entries(
                self.index.log.entries_for_agent(agent),
            ))
        }
    }

    /// The recorded `TICK_OUTPUT` of `agent` at `sequence_number`.
    pub fn recorded_tick(
        &self,
        agent: &AgentId,
        sequence_number: u64,
    ) -> Result<Arc<LogEntry>, ReplayError> {
        self.trace(agent)
            .tick(sequence_number)
            .cloned()
            .ok_or_else(|| ReplayError::MissingLog {
                agent: agent.clone(),
                seq: sequence_number,
            })
    }

    /// Deep-compare `computed` with the recorded output. No-op in LIVE mode.
    pub fn verify_tick(
        &self,
        agent: &AgentId,
        sequence_number: u64,
        computed: &TickOutput,
    ) -> Result<(), ReplayError> {
        if self.mode.is_live() {
            return Ok(());
        }
        let entry = self.recorded_tick(agent, sequence_number)?;
        let Some(recorded) = entry.as_tick() else {
            return Err(ReplayError::MissingLog {
                agent: agent.clone(),
                seq: sequence_number,
            });
        };
        if canonical_eq(&recorded.output, computed)? {
            return Ok(());
        }
        let detail = format!(
            "expected {}, got {}",
            canonical_json(&recorded.output)?,
            canonical_json(computed)?
        );
        error!(agent = %agent, seq = sequence_number, %detail, "Replay output diverged");
        Err(ReplayError::Divergence {
            agent: agent.clone(),
            seq: sequence_number,
            detail,
        })
    }

    /// Byte-compare a recomputed state hash with the one in `entry`.
    pub fn check_hash(
        &self,
        agent: &AgentId,
        entry: &LogEntry,
        actual: &str,
    ) -> Result<(), ReplayError> {
        let Some(recorded) = entry.as_tick() else {
            return Err(ReplayError::MissingLog {
                agent: agent.clone(),
                seq: 0,
            });
        };
        if recorded.state_hash == actual {
            return Ok(());
        }
        error!(
            agent = %agent,
            seq = recorded.sequence_number,
            expected = %recorded.state_hash,
            actual,
            "Cryptographic divergence"
        );
        Err(ReplayError::HashMismatch {
            agent: agent.clone(),
            seq: recorded.sequence_number,
            expected: recorded.state_hash.clone(),
            actual: actual.to_string(),
        })
    }
}
