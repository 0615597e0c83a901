use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One unit of agent work, supplied externally per tick.
///
/// Payloads are opaque JSON. Any `kind` outside the known set deserializes
/// to [`Instruction::Unknown`], which the tick engine turns into a
/// `FAILED("UNKNOWN_INSTRUCTION")` output instead of an error.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Instruction {
    Noop,
    Return {
        #[serde(default)]
        value: Value,
    },
    CallTool {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    Delegate {
        target: String,
        #[serde(default)]
        payload: Value,
    },
    #[serde(other)]
    Unknown,
}

impl Instruction {
    pub fn ret(value: impl Into<Value>) -> Self {
        Instruction::Return {
            value: value.into(),
        }
    }

    pub fn call_tool(tool_name: impl Into<String>, args: Value) -> Self {
        Instruction::CallTool {
            tool_name: tool_name.into(),
            args,
        }
    }

    pub fn delegate(target: impl Into<String>, payload: Value) -> Self {
        Instruction::Delegate {
            target: target.into(),
            payload,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Instruction::Noop => "NOOP",
            Instruction::Return { .. } => "RETURN",
            Instruction::CallTool { .. } => "CALL_TOOL",
            Instruction::Delegate { .. } => "DELEGATE",
            Instruction::Unknown => "UNKNOWN",
        }
    }
}

/// Result of interpreting one instruction.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickOutput {
    Completed {
        #[serde(default)]
        result: Value,
    },
    PendingTool {
        #[serde(rename = "toolName")]
        tool_name: String,
        #[serde(default)]
        args: Value,
    },
    PendingDelegation {
        target: String,
        #[serde(default)]
        payload: Value,
    },
    Failed {
        error: String,
    },
}

impl TickOutput {
    pub fn failed(error: impl Into<String>) -> Self {
        TickOutput::Failed {
            error: error.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            TickOutput::Completed { .. } => "COMPLETED",
            TickOutput::PendingTool { .. } => "PENDING_TOOL",
            TickOutput::PendingDelegation { .. } => "PENDING_DELEGATION",
            TickOutput::Failed { .. } => "FAILED",
        }
    }
}
