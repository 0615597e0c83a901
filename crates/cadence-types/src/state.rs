use serde::{Deserialize, Serialize};

/// Lifecycle state of an agent. Exactly one current state per agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AgentState {
    Defined,
    Spawned,
    Active,
    Waiting,
    Resumable,
    Completing,
    Faulted,
    Recovering,
    /// Sink state: no transition leaves it.
    Terminated,
}

/// Trigger driving a lifecycle transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionTrigger {
    Spawn,
    Activate,
    Yield,
    AwaitTool,
    Complete,
    Error,
    Suspend,
    Resume,
    Timeout,
    Expire,
    TeardownOk,
    Recover,
    Abandon,
    RecoverySuccess,
    RecoveryExhausted,
    /// Audited out-of-table state change used by replay bootstrap only.
    /// Never matches a row of [`TRANSITIONS`].
    Force,
}

/// The fixed lifecycle transition table: `(from, trigger) -> to`.
pub const TRANSITIONS: &[(AgentState, TransitionTrigger, AgentState)] = &[
    (AgentState::Defined, TransitionTrigger::Spawn, AgentState::Spawned),
    (AgentState::Spawned, TransitionTrigger::Activate, AgentState::Active),
    (AgentState::Active, TransitionTrigger::Yield, AgentState::Waiting),
    (AgentState::Active, TransitionTrigger::AwaitTool, AgentState::Waiting),
    (AgentState::Active, TransitionTrigger::Complete, AgentState::Completing),
    (AgentState::Active, TransitionTrigger::Error, AgentState::Faulted),
    (AgentState::Active, TransitionTrigger::Suspend, AgentState::Resumable),
    (AgentState::Waiting, TransitionTrigger::Resume, AgentState::Active),
    (AgentState::Waiting, TransitionTrigger::Timeout, AgentState::Faulted),
    (AgentState::Waiting, TransitionTrigger::Error, AgentState::Faulted),
    (AgentState::Resumable, TransitionTrigger::Resume, AgentState::Active),
    (AgentState::Resumable, TransitionTrigger::Expire, AgentState::Terminated),
    (AgentState::Completing, TransitionTrigger::TeardownOk, AgentState::Terminated),
    (AgentState::Faulted, TransitionTrigger::Recover, AgentState::Recovering),
    (AgentState::Faulted, TransitionTrigger::Abandon, AgentState::Terminated),
    (AgentState::Recovering, TransitionTrigger::RecoverySuccess, AgentState::Active),
    (AgentState::Recovering, TransitionTrigger::RecoveryExhausted, AgentState::Terminated),
];

impl AgentState {
    /// Look up the table row for `(self, trigger)`.
    pub fn next(self, trigger: TransitionTrigger) -> Option<AgentState> {
        TRANSITIONS
            .iter()
            .find(|(from, t, _)| *from == self && *t == trigger)
            .map(|(_, _, to)| *to)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, AgentState::Terminated)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgentState::Defined => "DEFINED",
            AgentState::Spawned => "SPAWNED",
            AgentState::Active => "ACTIVE",
            AgentState::Waiting => "WAITING",
            AgentState::Resumable => "RESUMABLE",
            AgentState::Completing => "COMPLETING",
            AgentState::Faulted => "FAULTED",
            AgentState::Recovering => "RECOVERING",
            AgentState::Terminated => "TERMINATED",
        }
    }
}

impl TransitionTrigger {
    /// Triggers that move an agent towards FAULTED or TERMINATED.
    /// These are the only edges failure escalation may walk.
    pub fn is_failure_edge(self) -> bool {
        matches!(
            self,
            TransitionTrigger::Error
                | TransitionTrigger::Timeout
                | TransitionTrigger::Abandon
                | TransitionTrigger::RecoveryExhausted
                | TransitionTrigger::Expire
                | TransitionTrigger::TeardownOk
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransitionTrigger::Spawn => "spawn",
            TransitionTrigger::Activate => "activate",
            TransitionTrigger::Yield => "yield",
            TransitionTrigger::AwaitTool => "await_tool",
            TransitionTrigger::Complete => "complete",
            TransitionTrigger::Error => "error",
            TransitionTrigger::Suspend => "suspend",
            TransitionTrigger::Resume => "resume",
            TransitionTrigger::Timeout => "timeout",
            TransitionTrigger::Expire => "expire",
            TransitionTrigger::TeardownOk => "teardown_ok",
            TransitionTrigger::Recover => "recover",
            TransitionTrigger::Abandon => "abandon",
            TransitionTrigger::RecoverySuccess => "recovery_success",
            TransitionTrigger::RecoveryExhausted => "recovery_exhausted",
            TransitionTrigger::Force => "force",
        }
    }
}

impl std::fmt::Display for AgentState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::fmt::Display for TransitionTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One applied lifecycle transition. Append-only history per agent.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleTransition {
    pub from: AgentState,
    pub to: AgentState,
    pub trigger: TransitionTrigger,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
    /// Sequence number of the log entry recording this transition.
    /// `None` when the transition was not written to the log (REPLAY mode,
    /// forced bootstrap).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus_seq: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}
