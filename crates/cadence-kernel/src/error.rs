use cadence_kernel_exec::{ProviderError, QuotaError, SchedulerError, ToolError};
use cadence_kernel_failure::FailureError;
use cadence_kernel_governance::GovernanceError;
use cadence_kernel_lifecycle::LifecycleError;
use cadence_kernel_log::LogError;
use cadence_kernel_memory::MemoryError;
use cadence_types::{AgentId, KernelMode};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum KernelError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("agent {0} is already registered")]
    DuplicateAgent(AgentId),

    #[error("agent {0} is not registered")]
    UnknownAgent(AgentId),

    #[error("operation requires {expected} mode, kernel is {actual}")]
    WrongMode {
        expected: KernelMode,
        actual: KernelMode,
    },

    #[error("no TICK_OUTPUT recorded for agent {0}")]
    NoRecordedTicks(AgentId),

    #[error("telemetry error: {0}")]
    Telemetry(String),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    #[error(transparent)]
    Tool(#[from] ToolError),

    #[error(transparent)]
    Quota(#[from] QuotaError),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Failure(#[from] FailureError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Governance(#[from] GovernanceError),

    #[error(transparent)]
    Memory(#[from] MemoryError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error("agent registry lock poisoned")]
    LockPoisoned,
}

pub type KernelResult<T> = Result<T, KernelError>;
