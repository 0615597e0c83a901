use cadence_kernel_governance::GovernanceError;
use cadence_kernel_log::LogError;
use cadence_types::AgentId;
use thiserror::Error;

/// Errors from the memory stores.
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("value for {key} is not JSON serializable: {reason}")]
    NotSerializable { key: String, reason: String },

    #[error("ephemeral scope {agent}:{tick_seq} is not active")]
    ScopeNotActive { agent: AgentId, tick_seq: u64 },

    #[error("no ephemeral checkpoint for {agent}:{tick_seq}")]
    NoCheckpoint { agent: AgentId, tick_seq: u64 },

    #[error("PERMISSION_DENIED: agent {agent} cannot {action} resource {resource}")]
    PermissionDenied {
        agent: AgentId,
        action: String,
        resource: String,
    },

    #[error("PERMISSION_ESCALATED: agent {agent} requires escalation to {action} resource {resource}")]
    PermissionEscalated {
        agent: AgentId,
        action: String,
        resource: String,
    },

    #[error("governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("memory lock poisoned")]
    LockPoisoned,
}

pub(crate) fn to_memory_value<T: serde::Serialize + ?Sized>(
    key: &str,
    value: &T,
) -> Result<serde_json::Value, MemoryError> {
    serde_json::to_value(value).map_err(|e| MemoryError::NotSerializable {
        key: key.to_string(),
        reason: e.to_string(),
    })
}
