use serde::ser::{Error as _, SerializeStruct};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;

use cadence_types::{
    AgentId, AgentState, DelegationRequest, DelegationToken, FailureEvent, Instruction,
    PolicyDecision, TickOutput, TokenId, TransitionTrigger, TxId,
};

/// Discriminator of a log entry, written as `kind` on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogKind {
    LifecycleTransition,
    TickOutput,
    ToolResult,
    ToolError,
    DelegationIssued,
    DelegationRevoked,
    PermissionEvaluation,
    MemoryPersistentWrite,
    MemoryPersistentDelete,
    MemorySharedRead,
    MemorySharedWrite,
    FailureRecorded,
    TransientRetryScheduled,
    TransientExhausted,
    ChildFailureEscalation,
    PolicyViolationHalt,
    KernelPanic,
}

impl LogKind {
    pub const ALL: [LogKind; 17] = [
        LogKind::LifecycleTransition,
        LogKind::TickOutput,
        LogKind::ToolResult,
        LogKind::ToolError,
        LogKind::DelegationIssued,
        LogKind::DelegationRevoked,
        LogKind::PermissionEvaluation,
        LogKind::MemoryPersistentWrite,
        LogKind::MemoryPersistentDelete,
        LogKind::MemorySharedRead,
        LogKind::MemorySharedWrite,
        LogKind::FailureRecorded,
        LogKind::TransientRetryScheduled,
        LogKind::TransientExhausted,
        LogKind::ChildFailureEscalation,
        LogKind::PolicyViolationHalt,
        LogKind::KernelPanic,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogKind::LifecycleTransition => "LIFECYCLE_TRANSITION",
            LogKind::TickOutput => "TICK_OUTPUT",
            LogKind::ToolResult => "TOOL_RESULT",
            LogKind::ToolError => "TOOL_ERROR",
            LogKind::DelegationIssued => "DELEGATION_ISSUED",
            LogKind::DelegationRevoked => "DELEGATION_REVOKED",
            LogKind::PermissionEvaluation => "PERMISSION_EVALUATION",
            LogKind::MemoryPersistentWrite => "MEMORY_PERSISTENT_WRITE",
            LogKind::MemoryPersistentDelete => "MEMORY_PERSISTENT_DELETE",
            LogKind::MemorySharedRead => "MEMORY_SHARED_READ",
            LogKind::MemorySharedWrite => "MEMORY_SHARED_WRITE",
            LogKind::FailureRecorded => "FAILURE_RECORDED",
            LogKind::TransientRetryScheduled => "TRANSIENT_RETRY_SCHEDULED",
            LogKind::TransientExhausted => "TRANSIENT_EXHAUSTED",
            LogKind::ChildFailureEscalation => "CHILD_FAILURE_ESCALATION",
            LogKind::PolicyViolationHalt => "POLICY_VIOLATION_HALT",
            LogKind::KernelPanic => "KERNEL_PANIC",
        }
    }
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for LogKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LogKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown log kind: {s}"))
    }
}

// ---- Payload records ----

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LifecycleRecord {
    pub from: AgentState,
    pub to: AgentState,
    pub trigger: TransitionTrigger,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// One recorded tick: the instruction, its output and the post-tick state hash.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickRecord {
    pub sequence_number: u64,
    pub instruction: Instruction,
    pub output: TickOutput,
    pub state_hash: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResultRecord {
    pub sequence_number: u64,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    #[serde(default)]
    pub result: Value,
}

/// A tool call that produced no result. `code` is the error's stable prefix.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolErrorRecord {
    pub sequence_number: u64,
    pub tool_name: String,
    #[serde(default)]
    pub args: Value,
    pub code: String,
    pub message: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationIssuedRecord {
    pub request: DelegationRequest,
    pub token: DelegationToken,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRevokedRecord {
    pub token_id: TokenId,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PermissionRecord {
    pub action: String,
    pub resource: String,
    pub result: PolicyDecision,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentWriteRecord {
    pub tx_id: TxId,
    pub key: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistentDeleteRecord {
    pub tx_id: TxId,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedReadRecord {
    pub namespace: String,
    pub key: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SharedWriteRecord {
    pub tx_id: TxId,
    pub namespace: String,
    pub key: String,
    pub value: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub failure: FailureEvent,
}

/// Transient retry bookkeeping for one `(agent, tickSeq)`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryRecord {
    pub tick_seq: u64,
    pub retry_count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildFailureRecord {
    pub child_agent_id: AgentId,
    pub failure: FailureEvent,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyHaltRecord {
    pub tick_seq: u64,
    pub code: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct KernelPanicRecord {
    pub reason: String,
    #[serde(default)]
    pub context: Value,
}

/// Closed set of log payloads, one variant per [`LogKind`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogPayload {
    LifecycleTransition(LifecycleRecord),
    TickOutput(TickRecord),
    ToolResult(ToolResultRecord),
    ToolError(ToolErrorRecord),
    DelegationIssued(DelegationIssuedRecord),
    DelegationRevoked(DelegationRevokedRecord),
    PermissionEvaluation(PermissionRecord),
    MemoryPersistentWrite(PersistentWriteRecord),
    MemoryPersistentDelete(PersistentDeleteRecord),
    MemorySharedRead(SharedReadRecord),
    MemorySharedWrite(SharedWriteRecord),
    FailureRecorded(FailureRecord),
    TransientRetryScheduled(RetryRecord),
    TransientExhausted(RetryRecord),
    ChildFailureEscalation(ChildFailureRecord),
    PolicyViolationHalt(PolicyHaltRecord),
    KernelPanic(KernelPanicRecord),
}

impl LogPayload {
    pub fn kind(&self) -> LogKind {
        match self {
            LogPayload::LifecycleTransition(_) => LogKind::LifecycleTransition,
            LogPayload::TickOutput(_) => LogKind::TickOutput,
            LogPayload::ToolResult(_) => LogKind::ToolResult,
            LogPayload::ToolError(_) => LogKind::ToolError,
            LogPayload::DelegationIssued(_) => LogKind::DelegationIssued,
            LogPayload::DelegationRevoked(_) => LogKind::DelegationRevoked,
            LogPayload::PermissionEvaluation(_) => LogKind::PermissionEvaluation,
            LogPayload::MemoryPersistentWrite(_) => LogKind::MemoryPersistentWrite,
            LogPayload::MemoryPersistentDelete(_) => LogKind::MemoryPersistentDelete,
            LogPayload::MemorySharedRead(_) => LogKind::MemorySharedRead,
            LogPayload::MemorySharedWrite(_) => LogKind::MemorySharedWrite,
            LogPayload::FailureRecorded(_) => LogKind::FailureRecorded,
            LogPayload::TransientRetryScheduled(_) => LogKind::TransientRetryScheduled,
            LogPayload::TransientExhausted(_) => LogKind::TransientExhausted,
            LogPayload::ChildFailureEscalation(_) => LogKind::ChildFailureEscalation,
            LogPayload::PolicyViolationHalt(_) => LogKind::PolicyViolationHalt,
            LogPayload::KernelPanic(_) => LogKind::KernelPanic,
        }
    }
}

/// An appended, immutable log record.
///
/// Wire shape is `{kind, agentId, timestamp, busSeq, payload}`, one object per
/// JSON line. The `kind` is derived from the payload variant so the two can
/// never disagree.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(try_from = "RawLogEntry")]
pub struct LogEntry {
    pub agent_id: AgentId,
    /// Milliseconds since the Unix epoch. Never hashed.
    pub timestamp: u64,
    pub bus_seq: u64,
    pub payload: LogPayload,
}

impl LogEntry {
    pub fn kind(&self) -> LogKind {
        self.payload.kind()
    }

    /// The tick record, if this is a `TICK_OUTPUT` entry.
    pub fn as_tick(&self) -> Option<&TickRecord> {
        match &self.payload {
            LogPayload::TickOutput(record) => Some(record),
            _ => None,
        }
    }

    /// The tool result, if this is a `TOOL_RESULT` entry.
    pub fn as_tool_result(&self) -> Option<&ToolResultRecord> {
        match &self.payload {
            LogPayload::ToolResult(record) => Some(record),
            _ => None,
        }
    }

    /// The recorded tool error, if this is a `TOOL_ERROR` entry.
    pub fn as_tool_error(&self) -> Option<&ToolErrorRecord> {
        match &self.payload {
            LogPayload::ToolError(record) => Some(record),
            _ => None,
        }
    }

    pub fn as_lifecycle(&self) -> Option<&LifecycleRecord> {
        match &self.payload {
            LogPayload::LifecycleTransition(record) => Some(record),
            _ => None,
        }
    }
}

impl Serialize for LogEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let tagged = serde_json::to_value(&self.payload).map_err(S::Error::custom)?;
        let body = tagged.get("payload").cloned().unwrap_or(Value::Null);

        let mut state = serializer.serialize_struct("LogEntry", 5)?;
        state.serialize_field("kind", self.kind().as_str())?;
        state.serialize_field("agentId", &self.agent_id)?;
        state.serialize_field("timestamp", &self.timestamp)?;
        state.serialize_field("busSeq", &self.bus_seq)?;
        state.serialize_field("payload", &body)?;
        state.end()
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLogEntry {
    kind: String,
    agent_id: AgentId,
    timestamp: u64,
    bus_seq: u64,
    #[serde(default)]
    payload: Value,
}

impl TryFrom<RawLogEntry> for LogEntry {
    type Error = String;

    fn try_from(raw: RawLogEntry) -> Result<Self, Self::Error> {
        let tagged = serde_json::json!({ "kind": raw.kind, "payload": raw.payload });
        let payload: LogPayload = serde_json::from_value(tagged)
            .map_err(|e| format!("invalid {} payload: {e}", raw.kind))?;
        Ok(LogEntry {
            agent_id: raw.agent_id,
            timestamp: raw.timestamp,
            bus_seq: raw.bus_seq,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn tick_entry() -> LogEntry {
        LogEntry {
            agent_id: AgentId::from("agent-1"),
            timestamp: 42,
            bus_seq: 7,
            payload: LogPayload::TickOutput(TickRecord {
                sequence_number: 1,
                instruction: Instruction::ret(json!("done")),
                output: TickOutput::Completed {
                    result: json!("done"),
                },
                state_hash: "abc".into(),
            }),
        }
    }

    #[test]
    fn wire_shape_is_flat() {
        let v = serde_json::to_value(tick_entry()).unwrap();
        assert_eq!(v["kind"], "TICK_OUTPUT");
        assert_eq!(v["agentId"], "agent-1");
        assert_eq!(v["busSeq"], 7);
        assert_eq!(v["payload"]["sequenceNumber"], 1);
        assert_eq!(v["payload"]["output"]["kind"], "COMPLETED");
        assert_eq!(v["payload"]["stateHash"], "abc");
    }

    #[test]
    fn parses_back_from_json_line() {
        let line = serde_json::to_string(&tick_entry()).unwrap();
        let parsed: LogEntry = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed, tick_entry());
        assert!(parsed.as_tick().is_some());
        assert!(parsed.as_tool_result().is_none());
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let line = r#"{"kind":"NOT_A_KIND","agentId":"a","timestamp":1,"busSeq":1,"payload":{}}"#;
        let err = serde_json::from_str::<LogEntry>(line).unwrap_err();
        assert!(err.to_string().contains("NOT_A_KIND"));
    }

    #[test]
    fn payload_must_match_kind() {
        let line = r#"{"kind":"DELEGATION_REVOKED","agentId":"a","timestamp":1,"busSeq":1,"payload":{"action":"read"}}"#;
        assert!(serde_json::from_str::<LogEntry>(line).is_err());
    }

    #[test]
    fn kind_parses_case_insensitively() {
        assert_eq!("tick_output".parse::<LogKind>().unwrap(), LogKind::TickOutput);
        assert!("bogus".parse::<LogKind>().is_err());
        for kind in LogKind::ALL {
            let wire = serde_json::to_value(kind).unwrap();
            assert_eq!(wire, json!(kind.as_str()));
        }
    }
}
