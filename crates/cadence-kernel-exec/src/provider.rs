use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use cadence_types::{AgentId, Instruction};

use crate::error::ProviderError;

/// Source of instructions, typically an LLM or a heuristic planner.
///
/// Whatever it returns is opaque to the kernel; kinds outside the known set
/// fail the tick as `UNKNOWN_INSTRUCTION`.
#[async_trait]
pub trait InstructionProvider: Send + Sync {
    async fn next_instruction(
        &self,
        agent: &AgentId,
        goal: &str,
        context: &Value,
    ) -> Result<Instruction, ProviderError>;
}

/// Hands out a fixed list of instructions in order.
#[derive(Default)]
pub struct ScriptedProvider {
    script: Mutex<VecDeque<Instruction>>,
}

impl ScriptedProvider {
    pub fn new(script: impl IntoIterator<Item = Instruction>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.script.lock().map(|s| s.len()).unwrap_or(0)
    }
}

#[async_trait]
impl InstructionProvider for ScriptedProvider {
    async fn next_instruction(
        &self,
        _agent: &AgentId,
        _goal: &str,
        _context: &Value,
    ) -> Result<Instruction, ProviderError> {
        self.script
            .lock()
            .map_err(|_| ProviderError::Failed("script lock poisoned".into()))?
            .pop_front()
            .ok_or(ProviderError::Exhausted)
    }
}
