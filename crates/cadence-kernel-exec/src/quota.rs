use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::warn;

use cadence_types::AgentId;

use crate::error::QuotaError;

/// Per-agent limits.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuota {
    pub max_ticks: u64,
    pub max_tool_calls: u64,
}

/// Running counters. Attempts that exceed a limit are counted too.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceConsumption {
    pub ticks: u64,
    pub tool_calls: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuotaResource {
    Ticks,
    ToolCalls,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaResource::Ticks => f.write_str("ticks"),
            QuotaResource::ToolCalls => f.write_str("toolCalls"),
        }
    }
}

#[derive(Default)]
struct Account {
    quota: Option<ResourceQuota>,
    usage: ResourceConsumption,
}

/// Enforces tick and tool-call budgets.
///
/// Usage is counted for every agent. Only agents with a quota are limited.
/// Counters are never reset; assigning a new quota keeps the usage so far.
#[derive(Default)]
pub struct QuotaEnforcer {
    accounts: Mutex<HashMap<AgentId, Account>>,
}

impl QuotaEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_quota(&self, agent: &AgentId, quota: ResourceQuota) -> Result<(), QuotaError> {
        let mut accounts = self.accounts.lock().map_err(|_| QuotaError::LockPoisoned)?;
        accounts.entry(agent.clone()).or_default().quota = Some(quota);
        Ok(())
    }

    pub fn consume_tick(&self, agent: &AgentId) -> Result<(), QuotaError> {
        self.consume(agent, QuotaResource::Ticks)
    }

    pub fn consume_tool_call(&self, agent: &AgentId) -> Result<(), QuotaError> {
        self.consume(agent, QuotaResource::ToolCalls)
    }

    pub fn quota(&self, agent: &AgentId) -> Option<ResourceQuota> {
        self.accounts.lock().ok()?.get(agent)?.quota
    }

    pub fn usage(&self, agent: &AgentId) -> Option<ResourceConsumption> {
        self.accounts.lock().ok()?.get(agent).map(|a| a.usage)
    }

    fn consume(&self, agent: &AgentId, resource: QuotaResource) -> Result<(), QuotaError> {
        let mut accounts = self.accounts.lock().map_err(|_| QuotaError::LockPoisoned)?;
        let account = accounts.entry(agent.clone()).or_default();
        let (used, limit) = match resource {
            QuotaResource::Ticks => {
                account.usage.ticks += 1;
                (account.usage.ticks, account.quota.map(|q| q.max_ticks))
            }
            QuotaResource::ToolCalls => {
                account.usage.tool_calls += 1;
                (account.usage.tool_calls, account.quota.map(|q| q.max_tool_calls))
            }
        };
        let Some(limit) = limit else {
            return Ok(());
        };
        if used > limit {
            warn!(agent = %agent, %resource, used, limit, "Quota exceeded");
            return Err(QuotaError::Exceeded {
                resource,
                limit,
                agent: agent.clone(),
            });
        }
        Ok(())
    }
}
