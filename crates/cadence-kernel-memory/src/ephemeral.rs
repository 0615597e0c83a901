use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use cadence_types::AgentId;

use crate::error::{to_memory_value, MemoryError};

/// Handle to one live ephemeral scope.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct EphemeralHandle {
    pub agent: AgentId,
    pub tick_seq: u64,
}

impl std::fmt::Display for EphemeralHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.agent, self.tick_seq)
    }
}

type Scope = BTreeMap<String, Value>;
type ScopeKey = (AgentId, u64);

#[derive(Default)]
struct Scopes {
    live: HashMap<ScopeKey, Scope>,
    checkpoints: HashMap<ScopeKey, Scope>,
}

/// Tick-scoped scratch memory.
#[derive(Default)]
pub struct EphemeralStore {
    scopes: Mutex<Scopes>,
}

impl EphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create (or wipe) the scope for `(agent, tick_seq)`.
    pub fn init(&self, agent: &AgentId, tick_seq: u64) -> Result<EphemeralHandle, MemoryError> {
        let mut scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        scopes.live.insert((agent.clone(), tick_seq), Scope::new());
        debug!(agent = %agent, tick_seq, "Ephemeral scope initialized");
        Ok(EphemeralHandle {
            agent: agent.clone(),
            tick_seq,
        })
    }

    pub fn read(&self, handle: &EphemeralHandle, key: &str) -> Result<Option<Value>, MemoryError> {
        let scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let scope = scopes
            .live
            .get(&(handle.agent.clone(), handle.tick_seq))
            .ok_or_else(|| inactive(handle))?;
        Ok(scope.get(key).cloned())
    }

    pub fn write<T: Serialize + ?Sized>(
        &self,
        handle: &EphemeralHandle,
        key: &str,
        value: &T,
    ) -> Result<(), MemoryError> {
        let value = to_memory_value(key, value)?;
        let mut scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let scope = scopes
            .live
            .get_mut(&(handle.agent.clone(), handle.tick_seq))
            .ok_or_else(|| inactive(handle))?;
        scope.insert(key.to_string(), value);
        Ok(())
    }

    /// Snapshot the live scope so it can be restored after the tick ends.
    pub fn checkpoint(&self, agent: &AgentId, tick_seq: u64) -> Result<(), MemoryError> {
        let mut scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let key = (agent.clone(), tick_seq);
        let snapshot = scopes
            .live
            .get(&key)
            .cloned()
            .ok_or_else(|| MemoryError::ScopeNotActive {
                agent: agent.clone(),
                tick_seq,
            })?;
        scopes.checkpoints.insert(key, snapshot);
        debug!(agent = %agent, tick_seq, "Ephemeral scope checkpointed");
        Ok(())
    }

    /// Reinstate a checkpoint as the live scope.
    pub fn restore(&self, agent: &AgentId, tick_seq: u64) -> Result<EphemeralHandle, MemoryError> {
        let mut scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let key = (agent.clone(), tick_seq);
        let snapshot = scopes
            .checkpoints
            .get(&key)
            .cloned()
            .ok_or_else(|| MemoryError::NoCheckpoint {
                agent: agent.clone(),
                tick_seq,
            })?;
        scopes.live.insert(key, snapshot);
        Ok(EphemeralHandle {
            agent: agent.clone(),
            tick_seq,
        })
    }

    /// Remove both the live scope and its checkpoint.
    pub fn destroy(&self, agent: &AgentId, tick_seq: u64) -> Result<(), MemoryError> {
        let mut scopes = self.scopes.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let key = (agent.clone(), tick_seq);
        scopes.live.remove(&key);
        scopes.checkpoints.remove(&key);
        debug!(agent = %agent, tick_seq, "Ephemeral scope destroyed");
        Ok(())
    }

    pub fn is_active(&self, agent: &AgentId, tick_seq: u64) -> bool {
        self.scopes
            .lock()
            .map(|s| s.live.contains_key(&(agent.clone(), tick_seq)))
            .unwrap_or(false)
    }

    pub fn has_checkpoint(&self, agent: &AgentId, tick_seq: u64) -> bool {
        self.scopes
            .lock()
            .map(|s| s.checkpoints.contains_key(&(agent.clone(), tick_seq)))
            .unwrap_or(false)
    }
}

fn inactive(handle: &EphemeralHandle) -> MemoryError {
    MemoryError::ScopeNotActive {
        agent: handle.agent.clone(),
        tick_seq: handle.tick_seq,
    }
}
