use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use cadence_kernel_log::{
    ExecutionLog, KernelBus, KernelEvent, LogPayload, PersistentDeleteRecord,
    PersistentWriteRecord,
};
use cadence_types::{AgentId, TxId};

use crate::error::{to_memory_value, MemoryError};
use crate::WriteResult;

/// Per-agent key/value memory that outlives ticks.
///
/// Keys are kept sorted so snapshots are stable.
pub struct PersistentStore {
    log: Arc<ExecutionLog>,
    bus: Option<Arc<KernelBus>>,
    data: Mutex<HashMap<AgentId, BTreeMap<String, Value>>>,
    /// Per agent, the exclusive `busSeq` bound the keys were last rebuilt to.
    rebuilt_to: Mutex<HashMap<AgentId, u64>>,
}

impl PersistentStore {
    pub fn new(log: Arc<ExecutionLog>) -> Self {
        Self {
            log,
            bus: None,
            data: Mutex::new(HashMap::new()),
            rebuilt_to: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<KernelBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn read(&self, agent: &AgentId, key: &str) -> Option<Value> {
        self.data.lock().ok()?.get(agent)?.get(key).cloned()
    }

    /// Log a `MEMORY_PERSISTENT_WRITE`, then store the value.
    pub fn write<T: Serialize + ?Sized>(
        &self,
        agent: &AgentId,
        key: &str,
        value: &T,
        tx_id: TxId,
    ) -> Result<WriteResult, MemoryError> {
        let value = to_memory_value(key, value)?;
        let mut data = self.data.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let entry = self.log.append(
            agent,
            LogPayload::MemoryPersistentWrite(PersistentWriteRecord {
                tx_id: tx_id.clone(),
                key: key.to_string(),
                value: value.clone(),
            }),
        )?;
        data.entry(agent.clone())
            .or_default()
            .insert(key.to_string(), value);
        drop(data);

        debug!(agent = %agent, key, tx = %tx_id, seq = entry.bus_seq, "Persistent write");
        self.emit(agent, "write", key, entry.timestamp);
        Ok(WriteResult {
            success: true,
            tx_id,
            timestamp: entry.timestamp,
            bus_seq: entry.bus_seq,
        })
    }

    /// Log a `MEMORY_PERSISTENT_DELETE`, then remove the key.
    pub fn delete(&self, agent: &AgentId, key: &str, tx_id: TxId) -> Result<WriteResult, MemoryError> {
        let mut data = self.data.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let entry = self.log.append(
            agent,
            LogPayload::MemoryPersistentDelete(PersistentDeleteRecord {
                tx_id: tx_id.clone(),
                key: key.to_string(),
            }),
        )?;
        if let Some(keys) = data.get_mut(agent) {
            keys.remove(key);
        }
        drop(data);

        debug!(agent = %agent, key, tx = %tx_id, seq = entry.bus_seq, "Persistent delete");
        self.emit(agent, "delete", key, entry.timestamp);
        Ok(WriteResult {
            success: true,
            tx_id,
            timestamp: entry.timestamp,
            bus_seq: entry.bus_seq,
        })
    }

    /// Copy of every key held for `agent`, as a JSON object with sorted keys.
    pub fn snapshot(&self, agent: &AgentId) -> Value {
        let map: serde_json::Map<String, Value> = self
            .data
            .lock()
            .ok()
            .and_then(|data| data.get(agent).cloned())
            .unwrap_or_default()
            .into_iter()
            .collect();
        Value::Object(map)
    }

    /// Replace `agent`'s keys with the state recorded in the log.
    ///
    /// Folds the agent's `MEMORY_PERSISTENT_*` entries with `busSeq` below
    /// `before_seq` (all of them when `None`). Nothing is appended. Returns
    /// how many entries were applied.
    pub fn rebuild_from_log(
        &self,
        agent: &AgentId,
        before_seq: Option<u64>,
    ) -> Result<usize, MemoryError> {
        let mut keys = BTreeMap::new();
        let mut applied = 0;
        for entry in self.log.entries_for_agent(agent) {
            if before_seq.is_some_and(|bound| entry.bus_seq >= bound) {
                break;
            }
            if apply_recorded(&mut keys, &entry.payload) {
                applied += 1;
            }
        }
        self.data
            .lock()
            .map_err(|_| MemoryError::LockPoisoned)?
            .insert(agent.clone(), keys);
        let bound = before_seq.unwrap_or_else(|| self.log.next_seq());
        self.rebuilt_to
            .lock()
            .map_err(|_| MemoryError::LockPoisoned)?
            .insert(agent.clone(), bound);
        info!(agent = %agent, applied, "Persistent memory rebuilt from log");
        Ok(applied)
    }

    /// Move `agent`'s keys forward to the state recorded before `before_seq`.
    ///
    /// Only entries since the last rebuild are applied. A bound behind the
    /// last rebuild, or an agent never rebuilt, falls back to
    /// [`Self::rebuild_from_log`]. Meant for REPLAY, where nothing writes to
    /// the store between calls.
    pub fn advance_from_log(&self, agent: &AgentId, before_seq: u64) -> Result<usize, MemoryError> {
        let rebuilt_to = self
            .rebuilt_to
            .lock()
            .map_err(|_| MemoryError::LockPoisoned)?
            .get(agent)
            .copied();
        let Some(from) = rebuilt_to.filter(|from| *from <= before_seq) else {
            return self.rebuild_from_log(agent, Some(before_seq));
        };

        let entries = self
            .log
            .entries_between(from.saturating_sub(1), before_seq.saturating_sub(1));
        let mut applied = 0;
        {
            let mut data = self.data.lock().map_err(|_| MemoryError::LockPoisoned)?;
            let keys = data.entry(agent.clone()).or_default();
            for entry in entries.iter().filter(|e| &e.agent_id == agent) {
                if apply_recorded(keys, &entry.payload) {
                    applied += 1;
                }
            }
        }
        self.rebuilt_to
            .lock()
            .map_err(|_| MemoryError::LockPoisoned)?
            .insert(agent.clone(), before_seq);
        debug!(agent = %agent, applied, before_seq, "Persistent memory advanced");
        Ok(applied)
    }

    fn emit(&self, agent: &AgentId, action: &str, key: &str, timestamp: u64) {
        if let Some(bus) = &self.bus {
            bus.publish(&KernelEvent::MemoryAccess {
                agent_id: agent.clone(),
                scope: "persistent".into(),
                action: action.into(),
                key: key.into(),
                timestamp,
            });
        }
    }
}

/// Fold one recorded payload into `keys`. Returns whether it was a memory entry.
fn apply_recorded(keys: &mut BTreeMap<String, Value>, payload: &LogPayload) -> bool {
    match payload {
        LogPayload::MemoryPersistentWrite(w) => {
            keys.insert(w.key.clone(), w.value.clone());
            true
        }
        LogPayload::MemoryPersistentDelete(d) => {
            keys.remove(&d.key);
            true
        }
        _ => false,
    }
}
