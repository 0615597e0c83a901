use std::sync::Arc;

use tracing::{debug, warn};

use cadence_kernel_log::{ExecutionLog, LogPayload, PermissionRecord};
use cadence_types::{AgentId, PermissionGrant, PolicyDecision};

use crate::error::GovernanceError;

/// Reason recorded when no non-expired grant covers the request.
pub const NO_VALID_GRANT: &str = "NO_VALID_GRANT";

/// A single link of the policy chain.
///
/// Any `Fn(&AgentId, &str, &str, &[PermissionGrant]) -> PolicyDecision`
/// closure is a policy.
pub trait Policy: Send + Sync {
    fn evaluate(
        &self,
        agent: &AgentId,
        action: &str,
        resource: &str,
        grants: &[PermissionGrant],
    ) -> PolicyDecision;
}

impl<F> Policy for F
where
    F: Fn(&AgentId, &str, &str, &[PermissionGrant]) -> PolicyDecision + Send + Sync,
{
    fn evaluate(
        &self,
        agent: &AgentId,
        action: &str,
        resource: &str,
        grants: &[PermissionGrant],
    ) -> PolicyDecision {
        self(agent, action, resource, grants)
    }
}

/// Evaluates action/resource requests against grants and a policy chain.
pub struct PermissionModel {
    log: Arc<ExecutionLog>,
}

impl PermissionModel {
    pub fn new(log: Arc<ExecutionLog>) -> Self {
        Self { log }
    }

    pub fn evaluate(
        &self,
        agent: &AgentId,
        action: &str,
        resource: &str,
        grants: &[PermissionGrant],
        policies: &[Arc<dyn Policy>],
    ) -> Result<PolicyDecision, GovernanceError> {
        let now = self.log.now_ms();
        let has_valid_grant = grants
            .iter()
            .any(|g| g.is_active_at(now) && g.matches(action, resource));

        if !has_valid_grant {
            warn!(agent = %agent, action, resource, "Permission denied: no valid grant");
            self.record(agent, action, resource, PolicyDecision::Deny, Some(NO_VALID_GRANT))?;
            return Ok(PolicyDecision::Deny);
        }

        let mut decision = PolicyDecision::Allow;
        for policy in policies {
            match policy.evaluate(agent, action, resource, grants) {
                PolicyDecision::Deny => {
                    decision = PolicyDecision::Deny;
                    break;
                }
                PolicyDecision::Escalate => decision = PolicyDecision::Escalate,
                PolicyDecision::Allow => {}
            }
        }

        match decision {
            PolicyDecision::Allow => debug!(agent = %agent, action, resource, "Permission allowed"),
            other => warn!(agent = %agent, action, resource, decision = %other, "Permission not allowed"),
        }
        self.record(agent, action, resource, decision, None)?;
        Ok(decision)
    }

    fn record(
        &self,
        agent: &AgentId,
        action: &str,
        resource: &str,
        result: PolicyDecision,
        reason: Option<&str>,
    ) -> Result<(), GovernanceError> {
        self.log.append(
            agent,
            LogPayload::PermissionEvaluation(PermissionRecord {
                action: action.to_string(),
                resource: resource.to_string(),
                result,
                reason: reason.map(str::to_string),
            }),
        )?;
        Ok(())
    }
}
