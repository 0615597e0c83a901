use cadence_kernel_governance::GovernanceError;
use cadence_kernel_lifecycle::LifecycleError;
use cadence_kernel_log::LogError;
use thiserror::Error;

/// Errors raised while handling a failure.
#[derive(Error, Debug)]
pub enum FailureError {
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("log error: {0}")]
    Log(#[from] LogError),

    #[error("failure handler lock poisoned")]
    LockPoisoned,
}
