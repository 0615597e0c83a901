use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{error, info, warn};

use cadence_kernel_governance::DelegationProtocol;
use cadence_kernel_lifecycle::LifecycleController;
use cadence_kernel_log::{
    ChildFailureRecord, ExecutionLog, FailureRecord, KernelBus, KernelEvent, KernelPanicRecord,
    LogPayload, PolicyHaltRecord, RetryRecord,
};
use cadence_types::{AgentId, AgentState, FailureClass, FailureEvent, RecoveryRecord};

use crate::error::FailureError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailureConfig {
    /// Retries allowed per `(agent, tickSeq)` before a transient failure
    /// becomes permanent.
    pub max_transient_retries: u32,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
        }
    }
}

/// What the handler did with a failure.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureDisposition {
    /// Caller should retry the tick from its last checkpoint.
    #[serde(rename_all = "camelCase")]
    RetryScheduled { retry_count: u32 },
    /// Agent moved to FAULTED. `parent_notified` names the parent that
    /// received a `CHILD_FAILURE_ESCALATION`.
    #[serde(rename_all = "camelCase")]
    Faulted {
        escalated_from_transient: bool,
        parent_notified: Option<AgentId>,
    },
    /// Tick aborted; lifecycle untouched.
    Halted,
    /// Agent terminated and its delegation subtree revoked.
    #[serde(rename_all = "camelCase")]
    Terminated { revoked_tokens: usize },
}

type RetryKey = (AgentId, u64);

/// Routes classified failures to their recovery policy.
pub struct FailureHandler {
    log: Arc<ExecutionLog>,
    lifecycle: Arc<LifecycleController>,
    delegation: Arc<DelegationProtocol>,
    bus: Option<Arc<KernelBus>>,
    config: FailureConfig,
    retries: Mutex<HashMap<RetryKey, RecoveryRecord>>,
}

impl FailureHandler {
    pub fn new(
        log: Arc<ExecutionLog>,
        lifecycle: Arc<LifecycleController>,
        delegation: Arc<DelegationProtocol>,
        config: FailureConfig,
    ) -> Self {
        Self {
            log,
            lifecycle,
            delegation,
            bus: None,
            config,
            retries: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<KernelBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn config(&self) -> &FailureConfig {
        &self.config
    }

    /// Retry bookkeeping for `(agent, tick_seq)`, if retries are in flight.
    pub fn recovery(&self, agent: &AgentId, tick_seq: u64) -> Option<RecoveryRecord> {
        self.retries
            .lock()
            .ok()?
            .get(&(agent.clone(), tick_seq))
            .cloned()
    }

    /// Record `failure` and apply the policy of its class.
    pub fn handle(&self, failure: FailureEvent) -> Result<FailureDisposition, FailureError> {
        let mut failure = failure;
        if failure.timestamp == 0 {
            failure.timestamp = self.log.now_ms();
        }
        self.log.append(
            &failure.agent_id,
            LogPayload::FailureRecorded(FailureRecord {
                failure: failure.clone(),
            }),
        )?;
        warn!(
            agent = %failure.agent_id,
            tick_seq = failure.tick_seq,
            class = %failure.class,
            code = %failure.code,
            "Failure recorded"
        );

        match failure.class {
            FailureClass::Transient => self.handle_transient(failure),
            FailureClass::Permanent => self.handle_permanent(&failure, false),
            FailureClass::PolicyViolation => self.handle_policy_violation(&failure),
            FailureClass::InvariantBreach => self.handle_invariant_breach(&failure),
            FailureClass::Unrecognized => {
                let mut breach = failure;
                breach.message = format!("UNRECOGNIZED FAILURE CLASS: {}", breach.message);
                self.handle_invariant_breach(&breach)
            }
        }
    }

    fn handle_transient(&self, failure: FailureEvent) -> Result<FailureDisposition, FailureError> {
        let key = (failure.agent_id.clone(), failure.tick_seq);
        let now = self.log.now_ms();

        let mut retries = self.retries.lock().map_err(|_| FailureError::LockPoisoned)?;
        let record = retries.entry(key.clone()).or_insert_with(|| RecoveryRecord {
            agent_id: failure.agent_id.clone(),
            tick_seq: failure.tick_seq,
            retry_count: 0,
            last_attempt: now,
        });
        record.retry_count += 1;
        record.last_attempt = now;
        let retry_count = record.retry_count;

        let bookkeeping = RetryRecord {
            tick_seq: failure.tick_seq,
            retry_count,
        };
        if retry_count > self.config.max_transient_retries {
            self.log
                .append(&failure.agent_id, LogPayload::TransientExhausted(bookkeeping))?;
            retries.remove(&key);
            drop(retries);

            warn!(
                agent = %failure.agent_id,
                tick_seq = failure.tick_seq,
                retry_count,
                "Transient retries exhausted, escalating to permanent"
            );
            let mut escalated = failure;
            escalated.class = FailureClass::Permanent;
            escalated.message = format!("[ESCALATED TRANSIENT] {}", escalated.message);
            return self.handle_permanent(&escalated, true);
        }

        self.log
            .append(&failure.agent_id, LogPayload::TransientRetryScheduled(bookkeeping))?;
        info!(
            agent = %failure.agent_id,
            tick_seq = failure.tick_seq,
            retry_count,
            max = self.config.max_transient_retries,
            "Transient retry scheduled"
        );
        Ok(FailureDisposition::RetryScheduled { retry_count })
    }

    fn handle_permanent(
        &self,
        failure: &FailureEvent,
        escalated_from_transient: bool,
    ) -> Result<FailureDisposition, FailureError> {
        let agent = &failure.agent_id;
        self.lifecycle.escalate_to(agent, AgentState::Faulted)?;

        let parent_notified = match self.delegation.parent(agent) {
            Some(parent) => {
                self.log.append(
                    &parent,
                    LogPayload::ChildFailureEscalation(ChildFailureRecord {
                        child_agent_id: agent.clone(),
                        failure: failure.clone(),
                    }),
                )?;
                warn!(agent = %agent, parent = %parent, "Child failure escalated to parent");
                Some(parent)
            }
            None => None,
        };

        Ok(FailureDisposition::Faulted {
            escalated_from_transient,
            parent_notified,
        })
    }

    fn handle_policy_violation(&self, failure: &FailureEvent) -> Result<FailureDisposition, FailureError> {
        self.log.append(
            &failure.agent_id,
            LogPayload::PolicyViolationHalt(PolicyHaltRecord {
                tick_seq: failure.tick_seq,
                code: failure.code.clone(),
            }),
        )?;
        warn!(
            agent = %failure.agent_id,
            tick_seq = failure.tick_seq,
            code = %failure.code,
            "Policy violation, tick halted"
        );
        Ok(FailureDisposition::Halted)
    }

    /// Terminate, revoke and panic. Revocation and the panic record happen
    /// even when the lifecycle cannot reach TERMINATED.
    fn handle_invariant_breach(&self, failure: &FailureEvent) -> Result<FailureDisposition, FailureError> {
        let agent = &failure.agent_id;
        if let Err(e) = self.lifecycle.escalate_to(agent, AgentState::Terminated) {
            error!(agent = %agent, error = %e, "Could not terminate agent after invariant breach");
        }

        let revoked_tokens = self.delegation.revoke(agent)?;
        let entry = self.log.append(
            agent,
            LogPayload::KernelPanic(KernelPanicRecord {
                reason: failure.message.clone(),
                context: json!({
                    "code": failure.code,
                    "tickSeq": failure.tick_seq,
                    "context": failure.context,
                }),
            }),
        )?;
        error!(
            agent = %agent,
            code = %failure.code,
            revoked_tokens,
            "Kernel panic: {}",
            failure.message
        );

        if let Some(bus) = &self.bus {
            bus.publish(&KernelEvent::KernelPanic {
                agent_id: agent.clone(),
                reason: failure.message.clone(),
                timestamp: entry.timestamp,
            });
        }
        Ok(FailureDisposition::Terminated { revoked_tokens })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_kernel_log::{KernelEventKind, LogKind};
    use cadence_types::{DelegationRequest, KernelMode, PermissionGrant, TransitionTrigger};

    struct Fixture {
        log: Arc<ExecutionLog>,
        lifecycle: Arc<LifecycleController>,
        delegation: Arc<DelegationProtocol>,
        handler: FailureHandler,
    }

    fn fixture(max_transient_retries: u32) -> Fixture {
        let log = Arc::new(ExecutionLog::new());
        let lifecycle = Arc::new(LifecycleController::new(log.clone(), KernelMode::Live));
        let delegation = Arc::new(DelegationProtocol::new(log.clone()));
        let handler = FailureHandler::new(
            log.clone(),
            lifecycle.clone(),
            delegation.clone(),
            FailureConfig {
                max_transient_retries,
            },
        );
        Fixture {
            log,
            lifecycle,
            delegation,
            handler,
        }
    }

    fn activate(lifecycle: &LifecycleController, agent: &AgentId) {
        lifecycle.transition(agent, TransitionTrigger::Spawn, None).unwrap();
        lifecycle.transition(agent, TransitionTrigger::Activate, None).unwrap();
    }

    fn kinds_for(log: &ExecutionLog, agent: &AgentId) -> Vec<LogKind> {
        log.entries_for_agent(agent).iter().map(|e| e.kind()).collect()
    }

    fn failure(agent: &AgentId, class: FailureClass) -> FailureEvent {
        FailureEvent::new(agent.clone(), 1, class, "E_TEST", "boom")
    }

    #[test]
    fn transient_retries_then_escalates() {
        let f = fixture(2);
        let a = AgentId::from("a");
        activate(&f.lifecycle, &a);

        for expected in 1..=2 {
            let d = f.handler.handle(failure(&a, FailureClass::Transient)).unwrap();
            assert_eq!(d, FailureDisposition::RetryScheduled { retry_count: expected });
            assert_eq!(f.lifecycle.state(&a), AgentState::Active);
        }
        assert_eq!(f.handler.recovery(&a, 1).unwrap().retry_count, 2);

        let d = f.handler.handle(failure(&a, FailureClass::Transient)).unwrap();
        assert_eq!(
            d,
            FailureDisposition::Faulted {
                escalated_from_transient: true,
                parent_notified: None
            }
        );
        assert_eq!(f.lifecycle.state(&a), AgentState::Faulted);
        assert!(f.handler.recovery(&a, 1).is_none());

        let kinds = kinds_for(&f.log, &a);
        assert!(kinds.contains(&LogKind::TransientExhausted));
        assert_eq!(
            kinds.iter().filter(|k| **k == LogKind::TransientRetryScheduled).count(),
            2
        );
    }

    #[test]
    fn retries_are_counted_per_tick() {
        let f = fixture(1);
        let a = AgentId::from("a");
        activate(&f.lifecycle, &a);
        f.handler.handle(failure(&a, FailureClass::Transient)).unwrap();
        let mut other_tick = failure(&a, FailureClass::Transient);
        other_tick.tick_seq = 2;
        let d = f.handler.handle(other_tick).unwrap();
        assert_eq!(d, FailureDisposition::RetryScheduled { retry_count: 1 });
    }

    #[test]
    fn failure_is_recorded_before_anything_else() {
        let f = fixture(3);
        let a = AgentId::from("a");
        activate(&f.lifecycle, &a);
        let before = f.log.len();
        f.handler.handle(failure(&a, FailureClass::Permanent)).unwrap();
        let entries = f.log.entries();
        assert_eq!(entries[before].kind(), LogKind::FailureRecorded);
        assert_eq!(entries[before + 1].kind(), LogKind::LifecycleTransition);
    }

    #[test]
    fn permanent_failure_of_child_notifies_parent() {
        let f = fixture(3);
        let root = AgentId::from("root");
        f.delegation.init_root(&root, vec![PermissionGrant::all()]).unwrap();
        let response = f
            .delegation
            .delegate(DelegationRequest::new(root.clone(), vec![PermissionGrant::new("read", "logs")], 5, 10_000_000_000_000))
            .unwrap();
        let child = response.child().unwrap().clone();
        activate(&f.lifecycle, &child);

        let d = f.handler.handle(failure(&child, FailureClass::Permanent)).unwrap();
        assert_eq!(
            d,
            FailureDisposition::Faulted {
                escalated_from_transient: false,
                parent_notified: Some(root.clone())
            }
        );
        let notice = f
            .log
            .find(|e| e.kind() == LogKind::ChildFailureEscalation)
            .unwrap();
        assert_eq!(notice.agent_id, root);
        match &notice.payload {
            LogPayload::ChildFailureEscalation(r) => assert_eq!(r.child_agent_id, child),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn root_permanent_failure_notifies_nobody() {
        let f = fixture(3);
        let root = AgentId::from("root");
        f.delegation.init_root(&root, vec![]).unwrap();
        activate(&f.lifecycle, &root);
        f.handler.handle(failure(&root, FailureClass::Permanent)).unwrap();
        assert!(f.log.find(|e| e.kind() == LogKind::ChildFailureEscalation).is_none());
    }

    #[test]
    fn policy_violation_leaves_lifecycle_alone() {
        let f = fixture(3);
        let a = AgentId::from("a");
        activate(&f.lifecycle, &a);
        let d = f.handler.handle(failure(&a, FailureClass::PolicyViolation)).unwrap();
        assert_eq!(d, FailureDisposition::Halted);
        assert_eq!(f.lifecycle.state(&a), AgentState::Active);
        assert_eq!(
            kinds_for(&f.log, &a)[2..],
            [LogKind::FailureRecorded, LogKind::PolicyViolationHalt]
        );
    }

    #[test]
    fn invariant_breach_terminates_and_revokes_subtree() {
        let f = fixture(3);
        let bus = Arc::new(KernelBus::new());
        let panics = Arc::new(Mutex::new(0));
        let seen = panics.clone();
        bus.subscribe(Some(KernelEventKind::KernelPanic), move |_| {
            *seen.lock().unwrap() += 1;
        });
        let handler = FailureHandler::new(
            f.log.clone(),
            f.lifecycle.clone(),
            f.delegation.clone(),
            FailureConfig::default(),
        )
        .with_bus(bus);

        let root = AgentId::from("root");
        f.delegation.init_root(&root, vec![PermissionGrant::all()]).unwrap();
        let child = f
            .delegation
            .delegate(DelegationRequest::new(root.clone(), vec![PermissionGrant::all()], 5, 1_000_000))
            .unwrap()
            .child()
            .unwrap()
            .clone();
        activate(&f.lifecycle, &root);

        let d = handler.handle(failure(&root, FailureClass::InvariantBreach)).unwrap();
        assert_eq!(d, FailureDisposition::Terminated { revoked_tokens: 2 });
        assert_eq!(f.lifecycle.state(&root), AgentState::Terminated);
        assert!(f.delegation.token(&root).unwrap().revoked);
        assert!(f.delegation.token(&child).unwrap().revoked);
        assert_eq!(*panics.lock().unwrap(), 1);
        assert_eq!(f.log.entries().last().unwrap().kind(), LogKind::KernelPanic);
    }

    #[test]
    fn unrecognized_class_is_treated_as_breach() {
        let f = fixture(3);
        let a = AgentId::from("a");
        activate(&f.lifecycle, &a);
        let d = f.handler.handle(failure(&a, FailureClass::Unrecognized)).unwrap();
        assert!(matches!(d, FailureDisposition::Terminated { .. }));
        let panic = f.log.find(|e| e.kind() == LogKind::KernelPanic).unwrap();
        match &panic.payload {
            LogPayload::KernelPanic(r) => {
                assert!(r.reason.starts_with("UNRECOGNIZED FAILURE CLASS"))
            }
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn breach_before_spawn_still_panics() {
        let f = fixture(3);
        let a = AgentId::from("fresh");
        let d = f.handler.handle(failure(&a, FailureClass::InvariantBreach)).unwrap();
        assert_eq!(d, FailureDisposition::Terminated { revoked_tokens: 0 });
        assert_eq!(f.lifecycle.state(&a), AgentState::Defined);
        assert_eq!(
            kinds_for(&f.log, &a),
            vec![LogKind::FailureRecorded, LogKind::KernelPanic]
        );
    }
}
