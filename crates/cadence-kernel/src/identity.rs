use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use cadence_types::AgentId;

use crate::error::{KernelError, KernelResult};

/// Immutable description of a registered agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentIdentity {
    pub id: AgentId,
    pub agent_type: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl AgentIdentity {
    pub fn new(id: impl Into<AgentId>, agent_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            agent_type: agent_type.into(),
            created_at: Utc::now(),
            name: None,
            version: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

#[derive(Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<AgentId, AgentIdentity>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, identity: AgentIdentity) -> KernelResult<()> {
        let mut agents = self.agents.write().map_err(|_| KernelError::LockPoisoned)?;
        if agents.contains_key(&identity.id) {
            return Err(KernelError::DuplicateAgent(identity.id));
        }
        info!(agent = %identity.id, agent_type = %identity.agent_type, "Agent registered");
        agents.insert(identity.id.clone(), identity);
        Ok(())
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentIdentity> {
        self.agents.read().ok()?.get(id).cloned()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.agents
            .read()
            .map(|a| a.contains_key(id))
            .unwrap_or(false)
    }

    /// All identities, sorted by id.
    pub fn list(&self) -> Vec<AgentIdentity> {
        self.agents
            .read()
            .map(|a| a.values().cloned().collect())
            .unwrap_or_default()
    }
}
