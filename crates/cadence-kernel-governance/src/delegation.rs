use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use cadence_kernel_log::{DelegationIssuedRecord, DelegationRevokedRecord, ExecutionLog, LogPayload};
use cadence_types::{AgentId, DelegationRequest, DelegationToken, PermissionGrant, TokenId};

use crate::error::GovernanceError;

/// Depth budget of a root token.
pub const ROOT_MAX_DEPTH: u32 = 100;

/// Node of the delegation forest.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DelegationNode {
    pub agent_id: AgentId,
    /// `None` for roots.
    pub parent_id: Option<AgentId>,
    pub children: Vec<AgentId>,
    pub token: DelegationToken,
}

/// Why a delegation request was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionReason {
    ParentNotFound,
    ParentRevoked,
    ParentExpired,
    GrantsEscapeBounds,
    DepthExceeded,
    TtlExceeded,
}

impl std::fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RejectionReason::ParentNotFound => "Parent agent not found or uninitialized",
            RejectionReason::ParentRevoked => "Parent token is revoked",
            RejectionReason::ParentExpired => "Parent token is expired",
            RejectionReason::GrantsEscapeBounds => "Requested grants escape parent bounds",
            RejectionReason::DepthExceeded => "Requested maxDepth exceeds parent allowance",
            RejectionReason::TtlExceeded => "Requested ttl exceeds parent ttl",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DelegationResponse {
    #[serde(rename_all = "camelCase")]
    Accepted {
        token: DelegationToken,
        child_agent_id: AgentId,
    },
    Rejected { reason: RejectionReason },
}

impl DelegationResponse {
    pub fn is_accepted(&self) -> bool {
        matches!(self, DelegationResponse::Accepted { .. })
    }

    pub fn child(&self) -> Option<&AgentId> {
        match self {
            DelegationResponse::Accepted { child_agent_id, .. } => Some(child_agent_id),
            DelegationResponse::Rejected { .. } => None,
        }
    }
}

/// Maintains the delegation forest.
///
/// All mutations take the tree lock and then append to the log under it,
/// so a logged issuance or revocation always matches the tree.
pub struct DelegationProtocol {
    log: Arc<ExecutionLog>,
    nodes: Mutex<HashMap<AgentId, DelegationNode>>,
}

impl DelegationProtocol {
    pub fn new(log: Arc<ExecutionLog>) -> Self {
        Self {
            log,
            nodes: Mutex::new(HashMap::new()),
        }
    }

    /// Create a root token for `agent` with permissive depth and ttl bounds.
    pub fn init_root(
        &self,
        agent: &AgentId,
        grants: Vec<PermissionGrant>,
    ) -> Result<DelegationToken, GovernanceError> {
        let mut nodes = self.nodes.lock().map_err(|_| GovernanceError::LockPoisoned)?;
        if nodes.contains_key(agent) {
            return Err(GovernanceError::AlreadyRooted(agent.clone()));
        }
        let token = DelegationToken {
            token_id: TokenId::root(agent),
            parent_agent_id: agent.clone(),
            child_agent_id: agent.clone(),
            grants,
            max_depth: ROOT_MAX_DEPTH,
            ttl: u64::MAX,
            revoked: false,
        };
        nodes.insert(
            agent.clone(),
            DelegationNode {
                agent_id: agent.clone(),
                parent_id: None,
                children: Vec::new(),
                token: token.clone(),
            },
        );
        info!(agent = %agent, grants = token.grants.len(), "Delegation root initialized");
        Ok(token)
    }

    /// Validate and, if allowed, issue a child token.
    ///
    /// Rules are checked in order and the first failure is returned as
    /// `Rejected`, with no tree node and no log entry created.
    pub fn delegate(&self, request: DelegationRequest) -> Result<DelegationResponse, GovernanceError> {
        let now = self.log.now_ms();
        let mut nodes = self.nodes.lock().map_err(|_| GovernanceError::LockPoisoned)?;

        let verdict = match nodes.get(&request.parent_agent_id) {
            None => Err(RejectionReason::ParentNotFound),
            Some(parent) => check_request(&parent.token, &request, now),
        };
        if let Err(reason) = verdict {
            warn!(
                parent = %request.parent_agent_id,
                request_id = %request.request_id,
                %reason,
                "Delegation rejected"
            );
            return Ok(DelegationResponse::Rejected { reason });
        }

        let child_agent_id = AgentId::generate("agent");
        let token = DelegationToken {
            token_id: TokenId::new(),
            parent_agent_id: request.parent_agent_id.clone(),
            child_agent_id: child_agent_id.clone(),
            grants: request.grant_subset.clone(),
            max_depth: request.max_depth,
            ttl: request.ttl,
            revoked: false,
        };

        self.log.append(
            &request.parent_agent_id,
            LogPayload::DelegationIssued(DelegationIssuedRecord {
                request: request.clone(),
                token: token.clone(),
            }),
        )?;

        if let Some(parent) = nodes.get_mut(&request.parent_agent_id) {
            parent.children.push(child_agent_id.clone());
        }
        nodes.insert(
            child_agent_id.clone(),
            DelegationNode {
                agent_id: child_agent_id.clone(),
                parent_id: Some(request.parent_agent_id.clone()),
                children: Vec::new(),
                token: token.clone(),
            },
        );

        info!(
            parent = %request.parent_agent_id,
            child = %child_agent_id,
            token = %token.token_id,
            max_depth = token.max_depth,
            "Delegation issued"
        );
        Ok(DelegationResponse::Accepted {
            token,
            child_agent_id,
        })
    }

    /// Revoke `agent`'s token and every token below it.
    ///
    /// No-op when the agent has no token. Walks the subtree depth-first with
    /// an explicit stack and logs one `DELEGATION_REVOKED` per newly revoked
    /// token, each before its token is marked. Tokens already revoked are
    /// skipped but their children are still visited, so calling again after
    /// [`GovernanceError::RevokeIncomplete`] finishes the cascade. Returns how
    /// many tokens were revoked.
    pub fn revoke(&self, agent: &AgentId) -> Result<usize, GovernanceError> {
        let mut nodes = self.nodes.lock().map_err(|_| GovernanceError::LockPoisoned)?;
        if !nodes.contains_key(agent) {
            return Ok(0);
        }

        let mut revoked = 0;
        let mut stack = vec![agent.clone()];
        while let Some(current) = stack.pop() {
            let Some(node) = nodes.get_mut(&current) else {
                continue;
            };
            // Reversed so the first child is visited first.
            stack.extend(node.children.iter().rev().cloned());
            if node.token.revoked {
                continue;
            }
            let appended = self.log.append(
                &current,
                LogPayload::DelegationRevoked(DelegationRevokedRecord {
                    token_id: node.token.token_id.clone(),
                }),
            );
            if let Err(source) = appended {
                error!(agent = %agent, at = %current, revoked, error = %source, "Revocation cascade interrupted");
                return Err(GovernanceError::RevokeIncomplete {
                    agent: agent.clone(),
                    at: current,
                    revoked,
                    source,
                });
            }
            node.token.revoked = true;
            revoked += 1;
        }

        if revoked > 0 {
            warn!(agent = %agent, revoked, "Delegation subtree revoked");
        }
        Ok(revoked)
    }

    pub fn token(&self, agent: &AgentId) -> Option<DelegationToken> {
        self.nodes.lock().ok()?.get(agent).map(|n| n.token.clone())
    }

    pub fn node(&self, agent: &AgentId) -> Option<DelegationNode> {
        self.nodes.lock().ok()?.get(agent).cloned()
    }

    /// The delegating parent, `None` for roots and unknown agents.
    pub fn parent(&self, agent: &AgentId) -> Option<AgentId> {
        self.nodes.lock().ok()?.get(agent)?.parent_id.clone()
    }

    pub fn children(&self, agent: &AgentId) -> Vec<AgentId> {
        self.node(agent).map(|n| n.children).unwrap_or_default()
    }

    /// Every agent below `agent`, depth-first, not including `agent`.
    pub fn descendants(&self, agent: &AgentId) -> Vec<AgentId> {
        let Ok(nodes) = self.nodes.lock() else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut stack: Vec<AgentId> = nodes
            .get(agent)
            .map(|n| n.children.iter().rev().cloned().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if let Some(node) = nodes.get(&current) {
                stack.extend(node.children.iter().rev().cloned());
            }
            out.push(current);
        }
        out
    }

    /// Grants usable by `agent` right now: empty when the token is missing,
    /// revoked or expired, otherwise the non-expired grants.
    pub fn effective_grants(&self, agent: &AgentId) -> Vec<PermissionGrant> {
        let now = self.log.now_ms();
        match self.token(agent) {
            Some(token) if !token.revoked && !token.is_expired_at(now) => {
                token.active_grants(now).cloned().collect()
            }
            _ => Vec::new(),
        }
    }
}

fn check_request(
    parent: &DelegationToken,
    request: &DelegationRequest,
    now: u64,
) -> Result<(), RejectionReason> {
    if parent.revoked {
        return Err(RejectionReason::ParentRevoked);
    }
    if parent.is_expired_at(now) {
        return Err(RejectionReason::ParentExpired);
    }
    if !is_subset(&request.grant_subset, &parent.grants, now) {
        return Err(RejectionReason::GrantsEscapeBounds);
    }
    if request.max_depth >= parent.max_depth {
        return Err(RejectionReason::DepthExceeded);
    }
    if request.ttl > parent.ttl {
        return Err(RejectionReason::TtlExceeded);
    }
    Ok(())
}

/// Every requested grant is live and covered by some live parent grant.
fn is_subset(requested: &[PermissionGrant], parent: &[PermissionGrant], now: u64) -> bool {
    requested.iter().all(|child| {
        child.is_active_at(now)
            && parent
                .iter()
                .filter(|p| p.is_active_at(now))
                .any(|p| p.covers(child))
    })
}
