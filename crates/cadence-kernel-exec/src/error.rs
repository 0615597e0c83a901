use cadence_kernel_failure::InvariantError;
use cadence_kernel_lifecycle::LifecycleError;
use cadence_kernel_log::LogError;
use cadence_kernel_memory::MemoryError;
use cadence_types::{AgentId, AgentState, CanonicalError};
use thiserror::Error;

use crate::quota::QuotaResource;

/// Error reported by a tool handler.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct ToolFailure(pub String);

impl From<&str> for ToolFailure {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ToolFailure {
    fn from(s: String) -> Self {
        Self(s)
    }
}

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("TOOL_NOT_FOUND: {0}")]
    NotFound(String),

    #[error("tool {0} is already registered")]
    AlreadyRegistered(String),

    #[error("tool {tool} failed: {failure}")]
    Handler { tool: String, failure: ToolFailure },

    #[error("tool {tool} timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    #[error("REPLAY_MISSING_TOOL_RESULT: no recorded result of {tool} for agent {agent} at tick {seq}")]
    MissingReplayResult {
        agent: AgentId,
        seq: u64,
        tool: String,
    },

    /// REPLAY: the recorded run logged this call as failed.
    #[error("{code}: recorded failure of {tool} at tick {seq}: {message}")]
    Recorded {
        tool: String,
        seq: u64,
        code: String,
        message: String,
    },

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("tool registry lock poisoned")]
    LockPoisoned,
}

impl ToolError {
    /// Code stored in `TOOL_ERROR` entries.
    pub fn code(&self) -> &str {
        match self {
            Self::NotFound(_) => "TOOL_NOT_FOUND",
            Self::Handler { .. } => "TOOL_FAILED",
            Self::Timeout { .. } => "TOOL_TIMEOUT",
            Self::Recorded { code, .. } => code,
            Self::MissingReplayResult { .. } => "REPLAY_MISSING_TOOL_RESULT",
            Self::AlreadyRegistered(_) => "TOOL_ALREADY_REGISTERED",
            Self::Log(_) => "LOG_ERROR",
            Self::LockPoisoned => "LOCK_POISONED",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuotaError {
    #[error("QUOTA_EXCEEDED: agent {agent} exceeded {resource} limit of {limit}")]
    Exceeded {
        resource: QuotaResource,
        limit: u64,
        agent: AgentId,
    },

    #[error("quota lock poisoned")]
    LockPoisoned,
}

/// Replay verification failures.
///
/// Both divergence variants mean the recorded trace and the re-execution
/// disagree. They are never retried.
#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("REPLAY_MISSING_LOG: no TICK_OUTPUT for agent {agent} at tick {seq}")]
    MissingLog { agent: AgentId, seq: u64 },

    #[error("REPLAY_DIVERGENCE: agent {agent} at tick {seq}: {detail}")]
    Divergence {
        agent: AgentId,
        seq: u64,
        detail: String,
    },

    #[error("CRYPTOGRAPHIC_DIVERGENCE: Hash mismatch at tick {seq}. Expected {expected}, got {actual}")]
    HashMismatch {
        agent: AgentId,
        seq: u64,
        expected: String,
        actual: String,
    },

    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),
}

impl ReplayError {
    pub fn is_divergence(&self) -> bool {
        matches!(
            self,
            ReplayError::Divergence { .. } | ReplayError::HashMismatch { .. }
        )
    }

    /// Tick at which replay stopped, when known.
    pub fn seq(&self) -> Option<u64> {
        match self {
            ReplayError::MissingLog { seq, .. }
            | ReplayError::Divergence { seq, .. }
            | ReplayError::HashMismatch { seq, .. } => Some(*seq),
            ReplayError::Canonical(_) => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("instruction provider failed: {0}")]
    Failed(String),

    #[error("instruction provider has no more instructions")]
    Exhausted,
}

/// Errors surfaced by [`crate::Scheduler::run_agent_loop`].
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("agent {agent} is {state}, expected ACTIVE")]
    NotActive { agent: AgentId, state: AgentState },

    #[error(transparent)]
    Quota(#[from] QuotaError),

    /// The quota was exceeded and the `error` transition that should have
    /// faulted the agent failed as well.
    #[error("{quota} (faulting the agent failed: {lifecycle})")]
    QuotaFaultFailed {
        quota: QuotaError,
        #[source]
        lifecycle: LifecycleError,
    },

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Invariant(#[from] InvariantError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("canonicalization failed: {0}")]
    Canonical(#[from] CanonicalError),

    #[error("scheduler lock poisoned")]
    LockPoisoned,
}

impl SchedulerError {
    pub fn is_divergence(&self) -> bool {
        matches!(self, SchedulerError::Replay(e) if e.is_divergence())
    }

    /// The quota error behind this error, whether or not the agent was faulted.
    pub fn quota_error(&self) -> Option<&QuotaError> {
        match self {
            SchedulerError::Quota(quota) | SchedulerError::QuotaFaultFailed { quota, .. } => {
                Some(quota)
            }
            _ => None,
        }
    }
}
