use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::grant::PermissionGrant;
use crate::ids::{AgentId, TokenId};

/// Capability credential binding a child agent to a bounded subset of its
/// parent's grants, depth budget and time-to-live.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationToken {
    pub token_id: TokenId,
    pub parent_agent_id: AgentId,
    pub child_agent_id: AgentId,
    pub grants: Vec<PermissionGrant>,
    /// How many further delegation hops remain.
    pub max_depth: u32,
    /// Absolute expiry, milliseconds since the Unix epoch.
    pub ttl: u64,
    /// Write-once: never reset after becoming `true`.
    pub revoked: bool,
}

impl DelegationToken {
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        now_ms > self.ttl
    }

    /// Grants still in force at `now_ms`.
    pub fn active_grants(&self, now_ms: u64) -> impl Iterator<Item = &PermissionGrant> {
        self.grants.iter().filter(move |g| g.is_active_at(now_ms))
    }
}

/// A parent agent's request to mint a child with a subset of its grants.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationRequest {
    #[serde(default)]
    pub request_id: String,
    pub parent_agent_id: AgentId,
    /// What the child should do. Opaque to the kernel.
    #[serde(default)]
    pub task_spec: Value,
    pub grant_subset: Vec<PermissionGrant>,
    pub max_depth: u32,
    pub ttl: u64,
}

impl DelegationRequest {
    pub fn new(
        parent_agent_id: AgentId,
        grant_subset: Vec<PermissionGrant>,
        max_depth: u32,
        ttl: u64,
    ) -> Self {
        Self {
            request_id: format!("req-{}", uuid::Uuid::new_v4().simple()),
            parent_agent_id,
            task_spec: Value::Null,
            grant_subset,
            max_depth,
            ttl,
        }
    }

    pub fn with_task(mut self, task_spec: Value) -> Self {
        self.task_spec = task_spec;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_is_strictly_after_ttl() {
        let token = DelegationToken {
            token_id: TokenId::new(),
            parent_agent_id: AgentId::from("p"),
            child_agent_id: AgentId::from("c"),
            grants: vec![
                PermissionGrant::new("read", "logs"),
                PermissionGrant::new("write", "logs").expiring_at(50),
            ],
            max_depth: 1,
            ttl: 100,
            revoked: false,
        };
        assert!(!token.is_expired_at(100));
        assert!(token.is_expired_at(101));
        assert_eq!(token.active_grants(60).count(), 1);
    }

    #[test]
    fn request_wire_shape() {
        let req = DelegationRequest::new(AgentId::from("root"), vec![], 5, 10);
        let v = serde_json::to_value(&req).unwrap();
        assert_eq!(v["parentAgentId"], "root");
        assert_eq!(v["maxDepth"], 5);
        assert!(v["requestId"].as_str().unwrap().starts_with("req-"));
    }
}
