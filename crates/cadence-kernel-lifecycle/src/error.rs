use cadence_kernel_log::LogError;
use cadence_types::{AgentId, AgentState, TransitionTrigger};
use thiserror::Error;

/// Errors from the lifecycle controller.
#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("Invalid transition for agent {agent} from state {from} with trigger {trigger}")]
    InvalidTransition {
        agent: AgentId,
        from: AgentState,
        trigger: TransitionTrigger,
    },

    #[error("agent {agent} cannot reach {target} from {from} via failure edges")]
    Unreachable {
        agent: AgentId,
        from: AgentState,
        target: AgentState,
    },

    #[error("recorded lifecycle history for {agent} is inconsistent at busSeq {seq}: {reason}")]
    InconsistentHistory {
        agent: AgentId,
        seq: u64,
        reason: String,
    },

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("lifecycle lock poisoned")]
    LockPoisoned,
}
