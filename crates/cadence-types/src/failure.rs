use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::AgentId;

/// Failure classification. Each class has its own recovery policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureClass {
    /// Retried up to a configured bound, then escalated.
    Transient,
    /// Agent moves to FAULTED; parent is notified.
    Permanent,
    /// Tick aborted, agent left as-is.
    PolicyViolation,
    /// Agent terminated, delegation subtree revoked.
    InvariantBreach,
    /// Any class this build does not know. Handled as an invariant breach.
    #[serde(other)]
    Unrecognized,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailureClass::Transient => "TRANSIENT",
            FailureClass::Permanent => "PERMANENT",
            FailureClass::PolicyViolation => "POLICY_VIOLATION",
            FailureClass::InvariantBreach => "INVARIANT_BREACH",
            FailureClass::Unrecognized => "UNRECOGNIZED",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureEvent {
    pub agent_id: AgentId,
    pub tick_seq: u64,
    pub class: FailureClass,
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub context: Value,
    pub timestamp: u64,
}

impl FailureEvent {
    pub fn new(
        agent_id: AgentId,
        tick_seq: u64,
        class: FailureClass,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            agent_id,
            tick_seq,
            class,
            code: code.into(),
            message: message.into(),
            context: Value::Object(Default::default()),
            timestamp: 0,
        }
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }

    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// In-flight transient retry bookkeeping, keyed by `(agentId, tickSeq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryRecord {
    pub agent_id: AgentId,
    pub tick_seq: u64,
    pub retry_count: u32,
    pub last_attempt: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_class_deserializes_as_unrecognized() {
        let v = json!({
            "agentId": "a",
            "tickSeq": 3,
            "class": "COSMIC_RAY",
            "code": "X",
            "message": "m",
            "timestamp": 1
        });
        let event: FailureEvent = serde_json::from_value(v).unwrap();
        assert_eq!(event.class, FailureClass::Unrecognized);
        assert_eq!(event.context, Value::Null);
    }

    #[test]
    fn class_wire_names() {
        assert_eq!(
            serde_json::to_value(FailureClass::PolicyViolation).unwrap(),
            json!("POLICY_VIOLATION")
        );
    }
}
