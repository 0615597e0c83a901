use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use cadence_kernel_governance::{PermissionModel, Policy};
use cadence_kernel_log::{
    ExecutionLog, KernelBus, KernelEvent, LogPayload, SharedReadRecord, SharedWriteRecord,
};
use cadence_types::{AgentId, PermissionGrant, PolicyDecision, TxId};

use crate::error::{to_memory_value, MemoryError};
use crate::WriteResult;

/// Resource name the permission model sees for a shared key.
pub fn shared_resource(namespace: &str, key: &str) -> String {
    format!("shared/{namespace}/{key}")
}

/// Namespaced memory visible to every agent.
///
/// Each access is evaluated against the caller's grants and policies first.
/// `DENY` and `ESCALATE` both fail; there is no escalation path here.
pub struct SharedStore {
    log: Arc<ExecutionLog>,
    permissions: Arc<PermissionModel>,
    bus: Option<Arc<KernelBus>>,
    data: Mutex<HashMap<String, BTreeMap<String, Value>>>,
}

impl SharedStore {
    pub fn new(log: Arc<ExecutionLog>, permissions: Arc<PermissionModel>) -> Self {
        Self {
            log,
            permissions,
            bus: None,
            data: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<KernelBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Read a shared key. Only reads that find a value are logged.
    pub fn read(
        &self,
        agent: &AgentId,
        namespace: &str,
        key: &str,
        grants: &[PermissionGrant],
        policies: &[Arc<dyn Policy>],
    ) -> Result<Option<Value>, MemoryError> {
        self.check(agent, "read", namespace, key, grants, policies)?;

        let data = self.data.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let Some(value) = data.get(namespace).and_then(|ns| ns.get(key)).cloned() else {
            return Ok(None);
        };
        let entry = self.log.append(
            agent,
            LogPayload::MemorySharedRead(SharedReadRecord {
                namespace: namespace.to_string(),
                key: key.to_string(),
            }),
        )?;
        drop(data);

        self.emit(agent, "read", namespace, key, entry.timestamp);
        Ok(Some(value))
    }

    pub fn write<T: Serialize + ?Sized>(
        &self,
        agent: &AgentId,
        namespace: &str,
        key: &str,
        value: &T,
        tx_id: TxId,
        grants: &[PermissionGrant],
        policies: &[Arc<dyn Policy>],
    ) -> Result<WriteResult, MemoryError> {
        self.check(agent, "write", namespace, key, grants, policies)?;
        let value = to_memory_value(key, value)?;

        let mut data = self.data.lock().map_err(|_| MemoryError::LockPoisoned)?;
        let entry = self.log.append(
            agent,
            LogPayload::MemorySharedWrite(SharedWriteRecord {
                tx_id: tx_id.clone(),
                namespace: namespace.to_string(),
                key: key.to_string(),
                value: value.clone(),
            }),
        )?;
        data.entry(namespace.to_string())
            .or_default()
            .insert(key.to_string(), value);
        drop(data);

        debug!(agent = %agent, namespace, key, seq = entry.bus_seq, "Shared write");
        self.emit(agent, "write", namespace, key, entry.timestamp);
        Ok(WriteResult {
            success: true,
            tx_id,
            timestamp: entry.timestamp,
            bus_seq: entry.bus_seq,
        })
    }

    /// Keys currently held in `namespace`, sorted.
    pub fn keys(&self, namespace: &str) -> Vec<String> {
        self.data
            .lock()
            .ok()
            .and_then(|data| data.get(namespace).map(|ns| ns.keys().cloned().collect()))
            .unwrap_or_default()
    }

    fn check(
        &self,
        agent: &AgentId,
        action: &str,
        namespace: &str,
        key: &str,
        grants: &[PermissionGrant],
        policies: &[Arc<dyn Policy>],
    ) -> Result<(), MemoryError> {
        let resource = shared_resource(namespace, key);
        match self
            .permissions
            .evaluate(agent, action, &resource, grants, policies)?
        {
            PolicyDecision::Allow => Ok(()),
            PolicyDecision::Deny => Err(MemoryError::PermissionDenied {
                agent: agent.clone(),
                action: action.to_string(),
                resource,
            }),
            PolicyDecision::Escalate => Err(MemoryError::PermissionEscalated {
                agent: agent.clone(),
                action: action.to_string(),
                resource,
            }),
        }
    }

    fn emit(&self, agent: &AgentId, action: &str, namespace: &str, key: &str, timestamp: u64) {
        if let Some(bus) = &self.bus {
            bus.publish(&KernelEvent::MemoryAccess {
                agent_id: agent.clone(),
                scope: format!("shared/{namespace}"),
                action: action.into(),
                key: key.into(),
                timestamp,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_kernel_log::LogKind;
    use serde_json::json;

    fn store() -> (Arc<ExecutionLog>, SharedStore) {
        let log = Arc::new(ExecutionLog::new());
        let permissions = Arc::new(PermissionModel::new(log.clone()));
        (log.clone(), SharedStore::new(log, permissions))
    }

    fn kinds(log: &ExecutionLog) -> Vec<LogKind> {
        log.entries().iter().map(|e| e.kind()).collect()
    }

    #[test]
    fn permitted_write_then_read() {
        let (log, store) = store();
        let writer = AgentId::from("writer");
        let reader = AgentId::from("reader");
        let grants = [PermissionGrant::new("*", "shared/team")];

        store
            .write(&writer, "team", "plan", &json!({"step": 1}), TxId::from("t1"), &grants, &[])
            .unwrap();
        let value = store.read(&reader, "team", "plan", &grants, &[]).unwrap();
        assert_eq!(value, Some(json!({"step": 1})));
        assert_eq!(
            kinds(&log),
            vec![
                LogKind::PermissionEvaluation,
                LogKind::MemorySharedWrite,
                LogKind::PermissionEvaluation,
                LogKind::MemorySharedRead
            ]
        );
        assert_eq!(store.keys("team"), vec!["plan".to_string()]);
    }

    #[test]
    fn denied_access_is_not_performed() {
        let (log, store) = store();
        let a = AgentId::from("a");
        let grants = [PermissionGrant::new("read", "shared/team")];
        let err = store
            .write(&a, "team", "plan", &1, TxId::from("t"), &grants, &[])
            .unwrap_err();
        assert!(matches!(err, MemoryError::PermissionDenied { ref resource, .. } if resource == "shared/team/plan"));
        assert_eq!(kinds(&log), vec![LogKind::PermissionEvaluation]);
        assert!(store.keys("team").is_empty());
    }

    #[test]
    fn escalation_is_an_error() {
        let (_, store) = store();
        let escalate: Arc<dyn Policy> =
            Arc::new(|_: &AgentId, _: &str, _: &str, _: &[PermissionGrant]| PolicyDecision::Escalate);
        let err = store
            .read(&AgentId::from("a"), "ns", "k", &[PermissionGrant::all()], &[escalate])
            .unwrap_err();
        assert!(matches!(err, MemoryError::PermissionEscalated { .. }));
        assert!(err.to_string().starts_with("PERMISSION_ESCALATED"));
    }

    #[test]
    fn missing_key_read_is_not_logged() {
        let (log, store) = store();
        let got = store
            .read(&AgentId::from("a"), "ns", "nothing", &[PermissionGrant::all()], &[])
            .unwrap();
        assert_eq!(got, None);
        assert_eq!(kinds(&log), vec![LogKind::PermissionEvaluation]);
    }
}
