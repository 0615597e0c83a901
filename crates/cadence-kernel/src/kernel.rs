use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use cadence_kernel_exec::{
    AgentTrace, InstructionProvider, LoopOutcome, QuotaEnforcer, QuotaError, Scheduler,
    SchedulerError, ToolError, ToolGate, ToolHandler, ToolManifest, ToolRegistry,
};
use cadence_kernel_failure::{FailureDisposition, FailureHandler};
use cadence_kernel_governance::{DelegationProtocol, DelegationResponse, PermissionModel, Policy};
use cadence_kernel_lifecycle::LifecycleController;
use cadence_kernel_log::{ExecutionLog, KernelBus, TickRecord};
use cadence_kernel_memory::{EphemeralStore, PersistentStore, SharedStore, WriteResult};
use cadence_types::{
    AgentId, AgentState, DelegationRequest, DelegationToken, FailureClass, FailureEvent,
    Instruction, KernelMode, PermissionGrant, PolicyDecision, TransitionTrigger, TxId,
};

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::identity::{AgentIdentity, AgentRegistry};

/// How a supervised run ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisedOutcome {
    Finished(LoopOutcome),
    /// The loop failed and the failure handler disposed of it.
    Failed {
        error: String,
        failure: FailureEvent,
        disposition: FailureDisposition,
    },
}

/// One recorded loop as replayed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayedLoop {
    pub start_seq: u64,
    pub ticks: u64,
    /// Why the loop stopped early, when the recorded run stopped there too.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted: Option<String>,
}

/// Every recorded loop of one agent, replayed in sequence order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayOutcome {
    pub agent_id: AgentId,
    pub loops: Vec<ReplayedLoop>,
    /// Ticks replayed across all loops.
    pub ticks: u64,
    /// `TICK_OUTPUT` entries recorded for the agent.
    pub recorded: u64,
    pub state_hashes: Vec<String>,
    /// Lifecycle state after the last loop.
    pub state: AgentState,
}

impl ReplayOutcome {
    /// Every recorded tick was reproduced.
    pub fn is_complete(&self) -> bool {
        self.ticks == self.recorded
    }
}

/// Every kernel component wired around one log and one bus.
pub struct Kernel {
    config: KernelConfig,
    log: Arc<ExecutionLog>,
    bus: Arc<KernelBus>,
    registry: AgentRegistry,
    lifecycle: Arc<LifecycleController>,
    permissions: Arc<PermissionModel>,
    delegation: Arc<DelegationProtocol>,
    ephemeral: Arc<EphemeralStore>,
    persistent: Arc<PersistentStore>,
    shared: SharedStore,
    quota: Arc<QuotaEnforcer>,
    tools: Arc<ToolRegistry>,
    scheduler: Scheduler,
    failures: FailureHandler,
    policies: RwLock<Vec<Arc<dyn Policy>>>,
}

impl Kernel {
    /// Build a kernel from configuration.
    ///
    /// With `log.path` set the JSONL file is reopened (or created) and new
    /// entries are appended to it. Otherwise the log lives in memory.
    pub fn new(config: KernelConfig) -> KernelResult<Self> {
        let log = match &config.log.path {
            Some(path) => ExecutionLog::open_jsonl(path, config.log.sync)?,
            None => ExecutionLog::new(),
        };
        Ok(Self::assemble(config, Arc::new(log)))
    }

    /// Build a kernel over an existing log.
    pub fn with_log(config: KernelConfig, log: Arc<ExecutionLog>) -> Self {
        Self::assemble(config, log)
    }

    /// REPLAY kernel over recorded history, whatever `config.mode` says.
    pub fn replay(mut config: KernelConfig, log: Arc<ExecutionLog>) -> Self {
        config.mode = KernelMode::Replay;
        Self::assemble(config, log)
    }

    fn assemble(config: KernelConfig, log: Arc<ExecutionLog>) -> Self {
        let mode = config.mode;
        let bus = Arc::new(KernelBus::new());

        let lifecycle = Arc::new(LifecycleController::new(log.clone(), mode).with_bus(bus.clone()));
        let permissions = Arc::new(PermissionModel::new(log.clone()));
        let delegation = Arc::new(DelegationProtocol::new(log.clone()));
        let persistent = Arc::new(PersistentStore::new(log.clone()).with_bus(bus.clone()));
        let shared = SharedStore::new(log.clone(), permissions.clone()).with_bus(bus.clone());
        let quota = Arc::new(QuotaEnforcer::new());
        let tools = Arc::new(ToolRegistry::new());
        let gate = Arc::new(ToolGate::new(log.clone(), tools.clone(), mode));

        let scheduler = Scheduler::new(
            log.clone(),
            lifecycle.clone(),
            quota.clone(),
            gate,
            persistent.clone(),
            config.scheduler(),
        )
        .with_bus(bus.clone());
        let failures = FailureHandler::new(
            log.clone(),
            lifecycle.clone(),
            delegation.clone(),
            config.failure(),
        )
        .with_bus(bus.clone());

        info!(mode = %mode, entries = log.len(), "Kernel assembled");
        Self {
            config,
            log,
            bus,
            registry: AgentRegistry::new(),
            lifecycle,
            permissions,
            delegation,
            ephemeral: Arc::new(EphemeralStore::new()),
            persistent,
            shared,
            quota,
            tools,
            scheduler,
            failures,
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn mode(&self) -> KernelMode {
        self.config.mode
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<ExecutionLog> {
        &self.log
    }

    pub fn bus(&self) -> &Arc<KernelBus> {
        &self.bus
    }

    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    pub fn lifecycle(&self) -> &Arc<LifecycleController> {
        &self.lifecycle
    }

    pub fn permissions(&self) -> &Arc<PermissionModel> {
        &self.permissions
    }

    pub fn delegation(&self) -> &Arc<DelegationProtocol> {
        &self.delegation
    }

    pub fn ephemeral(&self) -> &Arc<EphemeralStore> {
        &self.ephemeral
    }

    pub fn persistent(&self) -> &Arc<PersistentStore> {
        &self.persistent
    }

    pub fn shared(&self) -> &SharedStore {
        &self.shared
    }

    pub fn quota(&self) -> &Arc<QuotaEnforcer> {
        &self.quota
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn failures(&self) -> &FailureHandler {
        &self.failures
    }

    pub fn register_tool(
        &self,
        manifest: ToolManifest,
        handler: Arc<dyn ToolHandler>,
    ) -> KernelResult<()> {
        Ok(self.tools.register(manifest, handler)?)
    }

    /// Append a policy to the chain used by [`Kernel::authorize`] and the
    /// shared memory helpers.
    pub fn add_policy(&self, policy: Arc<dyn Policy>) -> KernelResult<()> {
        self.policies
            .write()
            .map_err(|_| KernelError::LockPoisoned)?
            .push(policy);
        Ok(())
    }

    /// Register, spawn and activate a root agent holding `grants`.
    pub fn spawn_agent(
        &self,
        identity: AgentIdentity,
        grants: Vec<PermissionGrant>,
    ) -> KernelResult<DelegationToken> {
        self.require_live()?;
        let agent = identity.id.clone();
        self.registry.register(identity)?;
        self.lifecycle.transition(&agent, TransitionTrigger::Spawn, None)?;
        self.lifecycle.transition(&agent, TransitionTrigger::Activate, None)?;
        let token = self.delegation.init_root(&agent, grants)?;
        self.apply_default_quota(&agent)?;
        info!(agent = %agent, token = %token.token_id, "Agent spawned");
        Ok(token)
    }

    /// Issue a delegation and, when accepted, spawn and activate the child.
    pub fn delegate(&self, request: DelegationRequest) -> KernelResult<DelegationResponse> {
        self.require_live()?;
        let response = self.delegation.delegate(request)?;
        if let DelegationResponse::Accepted {
            token,
            child_agent_id,
        } = &response
        {
            self.registry
                .register(AgentIdentity::new(child_agent_id.clone(), "delegate"))?;
            self.lifecycle.transition(
                child_agent_id,
                TransitionTrigger::Spawn,
                Some(json!({ "parent": token.parent_agent_id })),
            )?;
            self.lifecycle
                .transition(child_agent_id, TransitionTrigger::Activate, None)?;
            self.apply_default_quota(child_agent_id)?;
        }
        Ok(response)
    }

    /// Revoke `agent`'s token and every token below it.
    pub fn revoke(&self, agent: &AgentId) -> KernelResult<usize> {
        Ok(self.delegation.revoke(agent)?)
    }

    /// Evaluate a request against the agent's live delegated grants and the
    /// kernel's policy chain.
    pub fn authorize(
        &self,
        agent: &AgentId,
        action: &str,
        resource: &str,
    ) -> KernelResult<PolicyDecision> {
        let grants = self.delegation.effective_grants(agent);
        let policies = self.policy_chain()?;
        Ok(self
            .permissions
            .evaluate(agent, action, resource, &grants, &policies)?)
    }

    pub fn read_shared(
        &self,
        agent: &AgentId,
        namespace: &str,
        key: &str,
    ) -> KernelResult<Option<Value>> {
        let grants = self.delegation.effective_grants(agent);
        let policies = self.policy_chain()?;
        Ok(self.shared.read(agent, namespace, key, &grants, &policies)?)
    }

    pub fn write_shared<T: Serialize + ?Sized>(
        &self,
        agent: &AgentId,
        namespace: &str,
        key: &str,
        value: &T,
    ) -> KernelResult<WriteResult> {
        let grants = self.delegation.effective_grants(agent);
        let policies = self.policy_chain()?;
        Ok(self.shared.write(
            agent,
            namespace,
            key,
            value,
            TxId::generate("tx"),
            &grants,
            &policies,
        )?)
    }

    /// Run `agent`'s tick loop.
    ///
    /// LIVE continues after the agent's last recorded tick. REPLAY starts
    /// at tick 1; use [`Kernel::replay_agent`] to bootstrap from the log.
    pub async fn run_agent(
        &self,
        agent: &AgentId,
        instruction: Instruction,
    ) -> KernelResult<LoopOutcome> {
        let start = match self.mode() {
            KernelMode::Live => self.scheduler.next_sequence(agent),
            KernelMode::Replay => 1,
        };
        Ok(self
            .scheduler
            .run_agent_loop_from(agent, instruction, start)
            .await?)
    }

    /// Ask `provider` for the first instruction, then run the loop.
    pub async fn run_with_provider(
        &self,
        agent: &AgentId,
        goal: &str,
        provider: &dyn InstructionProvider,
    ) -> KernelResult<LoopOutcome> {
        let context = json!({
            "state": self.lifecycle.state(agent),
            "memory": self.persistent.snapshot(agent),
        });
        let instruction = provider.next_instruction(agent, goal, &context).await?;
        self.run_agent(agent, instruction).await
    }

    /// Run the loop and route classified errors through the failure handler.
    ///
    /// Transient failures re-run the tick that requested the failing tool
    /// until the handler gives up. Errors with no failure class (invalid
    /// transitions, log I/O) are returned as-is.
    pub async fn run_supervised(
        &self,
        agent: &AgentId,
        instruction: Instruction,
    ) -> KernelResult<SupervisedOutcome> {
        self.require_live()?;
        let mut instruction = instruction;
        let mut failing_seq = None;

        loop {
            let start = self.scheduler.next_sequence(agent);
            let error = match self
                .scheduler
                .run_agent_loop_from(agent, instruction.clone(), start)
                .await
            {
                Ok(outcome) => return Ok(SupervisedOutcome::Finished(outcome)),
                Err(error) => error,
            };

            let last = self.last_tick(agent);
            let tick_seq = *failing_seq
                .get_or_insert_with(|| last.as_ref().map_or(start, |t| t.sequence_number));
            let Some(failure) = classify(agent, tick_seq, &error) else {
                return Err(error.into());
            };

            warn!(agent = %agent, tick_seq, class = %failure.class, code = %failure.code, "Supervised run failed");
            let disposition = self.failures.handle(failure.clone())?;
            if let FailureDisposition::RetryScheduled { retry_count } = disposition {
                info!(agent = %agent, tick_seq, retry_count, "Retrying tick");
                if let Some(tick) = last {
                    instruction = tick.instruction;
                }
                continue;
            }
            return Ok(SupervisedOutcome::Failed {
                error: error.to_string(),
                failure,
                disposition,
            });
        }
    }

    /// Re-run every recorded tick loop of `agent` against the log.
    ///
    /// Each loop starts at a recorded `TICK_OUTPUT` with its recorded
    /// instruction, after lifecycle state and persistent memory are rebuilt
    /// from the entries before it. Tool calls resolve from `TOOL_RESULT` and
    /// `TOOL_ERROR` entries. A loop that stops on a failure the log also
    /// records hands over to the next recorded tick; any other error ends
    /// the replay.
    pub async fn replay_agent(&self, agent: &AgentId) -> KernelResult<ReplayOutcome> {
        if !self.mode().is_replay() {
            return Err(KernelError::WrongMode {
                expected: KernelMode::Replay,
                actual: self.mode(),
            });
        }
        let trace = self.scheduler.trace(agent);
        let mut next = trace
            .first_tick()
            .cloned()
            .ok_or_else(|| KernelError::NoRecordedTicks(agent.clone()))?;
        self.apply_default_quota(agent)?;

        let mut outcome = ReplayOutcome {
            agent_id: agent.clone(),
            loops: Vec::new(),
            ticks: 0,
            recorded: trace.len() as u64,
            state_hashes: Vec::new(),
            state: self.lifecycle.state(agent),
        };
        loop {
            let Some(tick) = next.as_tick() else {
                return Err(KernelError::NoRecordedTicks(agent.clone()));
            };
            let start_seq = tick.sequence_number;

            let state = self.lifecycle.restore_from_log(agent, Some(next.bus_seq))?;
            if state != AgentState::Active {
                self.lifecycle
                    .force_state(agent, AgentState::Active, "replay bootstrap");
            }
            self.persistent.rebuild_from_log(agent, Some(next.bus_seq))?;

            info!(agent = %agent, start_seq, "Replaying recorded loop");
            let (progress, result) = self
                .scheduler
                .run_agent_loop_tracked(agent, tick.instruction.clone(), start_seq)
                .await;
            let halted = match result {
                Ok(_) => None,
                Err(error) => Some(self.recorded_halt(
                    agent,
                    &trace,
                    next.bus_seq,
                    progress.last_seq,
                    error,
                )?),
            };
            let last_seq = progress.last_seq.unwrap_or(start_seq);
            outcome.ticks += progress.ticks();
            outcome.loops.push(ReplayedLoop {
                start_seq,
                ticks: progress.ticks(),
                halted,
            });
            outcome.state_hashes.extend(progress.state_hashes);

            match trace.tick_after(last_seq) {
                Some(entry) => next = entry.clone(),
                None => break,
            }
        }

        outcome.state = self.lifecycle.state(agent);
        info!(
            agent = %agent,
            loops = outcome.loops.len(),
            ticks = outcome.ticks,
            recorded = outcome.recorded,
            "Agent replayed"
        );
        Ok(outcome)
    }

    pub fn flush(&self) -> KernelResult<()> {
        Ok(self.log.flush()?)
    }

    fn require_live(&self) -> KernelResult<()> {
        if self.mode().is_live() {
            Ok(())
        } else {
            Err(KernelError::WrongMode {
                expected: KernelMode::Live,
                actual: self.mode(),
            })
        }
    }

    /// Why a replayed loop stopped, when the recorded run stopped at the
    /// same place. Any other error is handed back.
    fn recorded_halt(
        &self,
        agent: &AgentId,
        trace: &AgentTrace,
        start_bus_seq: u64,
        last_seq: Option<u64>,
        error: SchedulerError,
    ) -> KernelResult<String> {
        let recorded = match &error {
            SchedulerError::Tool(ToolError::Recorded { .. }) => true,
            // A trace may end between a tool request and its outcome.
            SchedulerError::Tool(ToolError::MissingReplayResult { seq, .. }) => {
                trace.tick_after(*seq).is_none()
            }
            _ if error.quota_error().is_some() => {
                let after = last_seq
                    .and_then(|seq| trace.tick(seq))
                    .map_or(start_bus_seq.saturating_sub(1), |entry| entry.bus_seq);
                let before = last_seq
                    .and_then(|seq| trace.tick_after(seq))
                    .map(|entry| entry.bus_seq);
                self.recorded_quota_fault(agent, after, before)
            }
            _ => false,
        };
        if !recorded {
            return Err(error.into());
        }
        info!(agent = %agent, ?last_seq, %error, "Replayed loop stopped where the recorded run did");
        Ok(error.to_string())
    }

    /// Whether the log faults `agent` on a quota after bus sequence `after`
    /// and before `before`.
    fn recorded_quota_fault(&self, agent: &AgentId, after: u64, before: Option<u64>) -> bool {
        let up_to = before.map_or(u64::MAX, |seq| seq.saturating_sub(1));
        self.log.entries_between(after, up_to).iter().any(|entry| {
            &entry.agent_id == agent
                && entry.as_lifecycle().is_some_and(|record| {
                    record.trigger == TransitionTrigger::Error
                        && record
                            .meta
                            .as_ref()
                            .is_some_and(|meta| meta.get("quotaExceeded").is_some())
                })
        })
    }

    fn apply_default_quota(&self, agent: &AgentId) -> KernelResult<()> {
        if let Some(quota) = self.config.default_quota {
            self.quota.set_quota(agent, quota.into())?;
        }
        Ok(())
    }

    fn policy_chain(&self) -> KernelResult<Vec<Arc<dyn Policy>>> {
        Ok(self
            .policies
            .read()
            .map_err(|_| KernelError::LockPoisoned)?
            .clone())
    }

    fn last_tick(&self, agent: &AgentId) -> Option<TickRecord> {
        self.log
            .entries_for_agent(agent)
            .iter()
            .rev()
            .find_map(|e| e.as_tick().cloned())
    }
}

/// Map a loop error onto a failure class. `None` means the error is
/// structural and goes straight back to the caller.
fn classify(agent: &AgentId, tick_seq: u64, error: &SchedulerError) -> Option<FailureEvent> {
    if let Some(QuotaError::Exceeded {
        resource, limit, ..
    }) = error.quota_error()
    {
        return Some(
            FailureEvent::new(
                agent.clone(),
                tick_seq,
                FailureClass::Permanent,
                "QUOTA_EXCEEDED",
                error.to_string(),
            )
            .with_context(json!({ "resource": resource.to_string(), "limit": limit })),
        );
    }
    let failure = match error {
        SchedulerError::Invariant(breach) => breach.failure.clone(),
        SchedulerError::Replay(e) if e.is_divergence() => FailureEvent::new(
            agent.clone(),
            tick_seq,
            FailureClass::InvariantBreach,
            "REPLAY_DIVERGENCE",
            e.to_string(),
        ),
        SchedulerError::Tool(ToolError::NotFound(tool)) => FailureEvent::new(
            agent.clone(),
            tick_seq,
            FailureClass::Permanent,
            "TOOL_NOT_FOUND",
            error.to_string(),
        )
        .with_context(json!({ "tool": tool })),
        SchedulerError::Tool(ToolError::Handler { tool, .. }) => FailureEvent::new(
            agent.clone(),
            tick_seq,
            FailureClass::Transient,
            "TOOL_FAILED",
            error.to_string(),
        )
        .with_context(json!({ "tool": tool })),
        SchedulerError::Tool(ToolError::Timeout { tool, timeout_ms }) => FailureEvent::new(
            agent.clone(),
            tick_seq,
            FailureClass::Transient,
            "TOOL_TIMEOUT",
            error.to_string(),
        )
        .with_context(json!({ "tool": tool, "timeoutMs": timeout_ms })),
        _ => return None,
    };
    Some(failure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_kernel_exec::{FnTool, ToolFailure};
    use cadence_types::TickOutput;

    fn live() -> Kernel {
        Kernel::new(KernelConfig::default()).unwrap()
    }

    fn spawn(kernel: &Kernel, id: &str) -> AgentId {
        kernel
            .spawn_agent(AgentIdentity::new(id, "test"), vec![PermissionGrant::all()])
            .unwrap();
        AgentId::from(id)
    }

    #[tokio::test]
    async fn spawned_agent_runs_to_termination() {
        let kernel = live();
        let agent = spawn(&kernel, "a");
        assert_eq!(kernel.lifecycle().state(&agent), AgentState::Active);
        assert!(kernel.delegation().token(&agent).is_some());

        let outcome = kernel
            .run_agent(&agent, Instruction::ret(json!("done")))
            .await
            .unwrap();
        assert_eq!(outcome.state, AgentState::Terminated);
        assert_eq!(outcome.ticks, 1);
    }

    #[test]
    fn duplicate_spawn_is_rejected() {
        let kernel = live();
        spawn(&kernel, "a");
        let err = kernel
            .spawn_agent(AgentIdentity::new("a", "test"), vec![])
            .unwrap_err();
        assert!(matches!(err, KernelError::DuplicateAgent(_)));
    }

    #[tokio::test]
    async fn second_run_continues_the_sequence() {
        let kernel = live();
        let agent = spawn(&kernel, "a");
        kernel
            .register_tool(
                ToolManifest::new("echo", "echo args"),
                Arc::new(FnTool::new(|_: &AgentId, args: Value| Ok(args))),
            )
            .unwrap();
        let first = kernel
            .run_agent(&agent, Instruction::delegate("b", json!({})))
            .await
            .unwrap();
        assert_eq!(first.last_seq, 1);

        kernel
            .lifecycle()
            .transition(&agent, TransitionTrigger::Resume, None)
            .unwrap();
        let second = kernel
            .run_agent(&agent, Instruction::call_tool("echo", json!(1)))
            .await
            .unwrap();
        assert_eq!(second.last_seq, 3);
        assert_eq!(second.output, TickOutput::Completed { result: json!(1) });
    }

    #[tokio::test]
    async fn replay_kernel_refuses_live_operations() {
        let kernel = Kernel::replay(KernelConfig::default(), Arc::new(ExecutionLog::new()));
        assert_eq!(kernel.mode(), KernelMode::Replay);
        let err = kernel
            .spawn_agent(AgentIdentity::new("a", "test"), vec![])
            .unwrap_err();
        assert!(matches!(err, KernelError::WrongMode { .. }));
        let err = kernel
            .run_supervised(&AgentId::from("a"), Instruction::Noop)
            .await
            .unwrap_err();
        assert!(matches!(err, KernelError::WrongMode { .. }));
        let err = kernel.replay_agent(&AgentId::from("a")).await.unwrap_err();
        assert!(matches!(err, KernelError::NoRecordedTicks(_)));
    }

    #[tokio::test]
    async fn live_kernel_refuses_replay_agent() {
        let kernel = live();
        let err = kernel.replay_agent(&AgentId::from("a")).await.unwrap_err();
        assert!(matches!(
            err,
            KernelError::WrongMode {
                expected: KernelMode::Replay,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn transient_tool_failures_retry_then_fault() {
        let mut config = KernelConfig::default();
        config.max_transient_retries = 2;
        let kernel = Kernel::new(config).unwrap();
        let agent = spawn(&kernel, "a");
        kernel
            .register_tool(
                ToolManifest::new("flaky", "always fails"),
                Arc::new(FnTool::new(|_: &AgentId, _: Value| {
                    Err(ToolFailure::from("connection reset"))
                })),
            )
            .unwrap();

        let outcome = kernel
            .run_supervised(&agent, Instruction::call_tool("flaky", json!({})))
            .await
            .unwrap();
        match outcome {
            SupervisedOutcome::Failed {
                failure,
                disposition,
                ..
            } => {
                assert_eq!(failure.class, FailureClass::Transient);
                assert_eq!(failure.tick_seq, 1);
                assert_eq!(
                    disposition,
                    FailureDisposition::Faulted {
                        escalated_from_transient: true,
                        parent_notified: None,
                    }
                );
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(kernel.lifecycle().state(&agent), AgentState::Faulted);
        // the original attempt plus two retries
        let attempts = kernel
            .log()
            .entries_for_agent(&agent)
            .iter()
            .filter(|e| e.as_tick().is_some())
            .count();
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn transient_failure_recovers_on_retry() {
        let kernel = live();
        let agent = spawn(&kernel, "a");
        let calls = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let counter = calls.clone();
        kernel
            .register_tool(
                ToolManifest::new("once", "fails the first time"),
                Arc::new(FnTool::new(move |_: &AgentId, _: Value| {
                    if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                        Err(ToolFailure::from("busy"))
                    } else {
                        Ok(json!("ok"))
                    }
                })),
            )
            .unwrap();

        let outcome = kernel
            .run_supervised(&agent, Instruction::call_tool("once", json!({})))
            .await
            .unwrap();
        let SupervisedOutcome::Finished(outcome) = outcome else {
            panic!("expected the retry to succeed");
        };
        assert_eq!(outcome.output, TickOutput::Completed { result: json!("ok") });
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn unknown_tool_is_permanent() {
        let kernel = live();
        let agent = spawn(&kernel, "a");
        let outcome = kernel
            .run_supervised(&agent, Instruction::call_tool("missing", json!({})))
            .await
            .unwrap();
        let SupervisedOutcome::Failed { failure, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(failure.class, FailureClass::Permanent);
        assert_eq!(failure.code, "TOOL_NOT_FOUND");
        assert_eq!(kernel.lifecycle().state(&agent), AgentState::Faulted);
    }

    #[tokio::test]
    async fn structural_errors_are_returned() {
        let kernel = live();
        let agent = AgentId::from("never-spawned");
        let err = kernel
            .run_supervised(&agent, Instruction::Noop)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            KernelError::Scheduler(SchedulerError::NotActive { .. })
        ));
    }

    #[tokio::test]
    async fn provider_supplies_first_instruction() {
        use cadence_kernel_exec::ScriptedProvider;

        let kernel = live();
        let agent = spawn(&kernel, "a");
        let provider = ScriptedProvider::new(vec![Instruction::ret(json!(42))]);
        let outcome = kernel
            .run_with_provider(&agent, "answer", &provider)
            .await
            .unwrap();
        assert_eq!(outcome.output, TickOutput::Completed { result: json!(42) });
        assert_eq!(provider.remaining(), 0);
    }

    #[test]
    fn shared_memory_follows_delegated_grants() {
        let kernel = live();
        let root = spawn(&kernel, "root");
        let response = kernel
            .delegate(DelegationRequest::new(
                root.clone(),
                vec![PermissionGrant::new("read", "shared/notes")],
                5,
                u64::MAX - 1,
            ))
            .unwrap();
        let child = response.child().cloned().unwrap();
        assert_eq!(kernel.lifecycle().state(&child), AgentState::Active);
        assert!(kernel.registry().contains(&child));

        kernel.write_shared(&root, "notes", "k", &json!("v")).unwrap();
        assert_eq!(
            kernel.read_shared(&child, "notes", "k").unwrap(),
            Some(json!("v"))
        );
        assert!(kernel.write_shared(&child, "notes", "k", &json!("w")).is_err());
        assert_eq!(
            kernel.authorize(&child, "write", "shared/notes/k").unwrap(),
            PolicyDecision::Deny
        );

        kernel.revoke(&root).unwrap();
        assert!(kernel.read_shared(&child, "notes", "k").is_err());
    }

    #[test]
    fn policies_apply_to_authorize() {
        let kernel = live();
        let agent = spawn(&kernel, "a");
        kernel
            .add_policy(Arc::new(
                |_: &AgentId, action: &str, _: &str, _: &[PermissionGrant]| {
                    if action == "delete" {
                        PolicyDecision::Escalate
                    } else {
                        PolicyDecision::Allow
                    }
                },
            ))
            .unwrap();
        assert_eq!(
            kernel.authorize(&agent, "read", "x").unwrap(),
            PolicyDecision::Allow
        );
        assert_eq!(
            kernel.authorize(&agent, "delete", "x").unwrap(),
            PolicyDecision::Escalate
        );
    }
}
