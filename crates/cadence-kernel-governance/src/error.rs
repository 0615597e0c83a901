use cadence_kernel_log::LogError;
use cadence_types::AgentId;
use thiserror::Error;

/// Errors from permission evaluation and delegation.
///
/// A rejected delegation is not an error: it is returned as
/// [`crate::DelegationResponse::Rejected`].
#[derive(Error, Debug)]
pub enum GovernanceError {
    #[error("agent {0} already has a delegation root")]
    AlreadyRooted(AgentId),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("revocation below {agent} stopped at {at} after {revoked} tokens: {source}")]
    RevokeIncomplete {
        agent: AgentId,
        at: AgentId,
        revoked: usize,
        source: LogError,
    },

    #[error("governance lock poisoned")]
    LockPoisoned,
}
