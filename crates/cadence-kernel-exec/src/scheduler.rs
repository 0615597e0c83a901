use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use cadence_kernel_failure::invariants::{assert_not_terminated, assert_single_tick};
use cadence_kernel_lifecycle::LifecycleController;
use cadence_kernel_log::{ExecutionLog, KernelBus, KernelEvent, LogPayload, TickRecord};
use cadence_kernel_memory::PersistentStore;
use cadence_types::{
    state_hash, AgentId, AgentState, Instruction, KernelMode, TickOutput, TransitionTrigger,
};

use crate::error::{QuotaError, SchedulerError};
use crate::quota::QuotaEnforcer;
use crate::replay::{AgentTrace, ReplayController};
use crate::tick::run_tick;
use crate::tools::ToolGate;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Step budget handed to every tick.
    pub max_steps: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self { max_steps: 100 }
    }
}

/// How a tick loop ended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopOutcome {
    pub agent_id: AgentId,
    /// Output of the last tick.
    pub output: TickOutput,
    /// Lifecycle state after dispatch.
    pub state: AgentState,
    pub ticks: u64,
    pub last_seq: u64,
    /// State hash of every tick, in order.
    pub state_hashes: Vec<String>,
}

/// Ticks a loop got through, kept when the loop ends in an error.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopProgress {
    /// Sequence number of the last tick that ran.
    pub last_seq: Option<u64>,
    pub state_hashes: Vec<String>,
}

impl LoopProgress {
    pub fn ticks(&self) -> u64 {
        self.state_hashes.len() as u64
    }
}

/// The state a tick's hash commits to.
#[derive(Serialize)]
struct HashedState<'a> {
    output: &'a TickOutput,
    lifecycle: AgentState,
    memory: Value,
}

/// Drives the per-agent tick loop.
pub struct Scheduler {
    log: Arc<ExecutionLog>,
    lifecycle: Arc<LifecycleController>,
    quota: Arc<QuotaEnforcer>,
    tools: Arc<ToolGate>,
    persistent: Arc<PersistentStore>,
    replay: ReplayController,
    bus: Option<Arc<KernelBus>>,
    config: SchedulerConfig,
    running: Mutex<HashSet<AgentId>>,
}

struct RunningGuard<'a> {
    running: &'a Mutex<HashSet<AgentId>>,
    agent: AgentId,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        let mut running = self.running.lock().unwrap_or_else(|e| e.into_inner());
        running.remove(&self.agent);
    }
}

impl Scheduler {
    /// The scheduler runs in the lifecycle controller's mode.
    pub fn new(
        log: Arc<ExecutionLog>,
        lifecycle: Arc<LifecycleController>,
        quota: Arc<QuotaEnforcer>,
        tools: Arc<ToolGate>,
        persistent: Arc<PersistentStore>,
        config: SchedulerConfig,
    ) -> Self {
        let replay = ReplayController::new(log.clone(), lifecycle.mode());
        Self {
            log,
            lifecycle,
            quota,
            tools,
            persistent,
            replay,
            bus: None,
            config,
            running: Mutex::new(HashSet::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<KernelBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn mode(&self) -> KernelMode {
        self.replay.mode()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn is_running(&self, agent: &AgentId) -> bool {
        self.running
            .lock()
            .map(|r| r.contains(agent))
            .unwrap_or(false)
    }

    /// One past the highest tick sequence number recorded for `agent`.
    pub fn next_sequence(&self, agent: &AgentId) -> u64 {
        self.log
            .entries_for_agent(agent)
            .iter()
            .filter_map(|e| e.as_tick().map(|t| t.sequence_number))
            .max()
            .map_or(1, |seq| seq + 1)
    }

    /// Recorded ticks and tool outcomes of `agent`.
    pub fn trace(&self, agent: &AgentId) -> Arc<AgentTrace> {
        self.replay.trace(agent)
    }

    /// Run `agent`'s loop starting at tick 1.
    pub async fn run_agent_loop(
        &self,
        agent: &AgentId,
        instruction: Instruction,
    ) -> Result<LoopOutcome, SchedulerError> {
        self.run_agent_loop_from(agent, instruction, 1).await
    }

    /// Run ticks until the agent leaves ACTIVE.
    ///
    /// Tool results become the next tick's `RETURN` instruction. Quota
    /// exhaustion faults the agent before the error is returned; tool and
    /// replay errors leave the lifecycle as it is.
    pub async fn run_agent_loop_from(
        &self,
        agent: &AgentId,
        instruction: Instruction,
        start_seq: u64,
    ) -> Result<LoopOutcome, SchedulerError> {
        let mut progress = LoopProgress::default();
        self.drive(agent, instruction, start_seq, &mut progress).await
    }

    /// Like [`Self::run_agent_loop_from`], but also hands back the ticks that
    /// ran before an error.
    pub async fn run_agent_loop_tracked(
        &self,
        agent: &AgentId,
        instruction: Instruction,
        start_seq: u64,
    ) -> (LoopProgress, Result<LoopOutcome, SchedulerError>) {
        let mut progress = LoopProgress::default();
        let result = self.drive(agent, instruction, start_seq, &mut progress).await;
        (progress, result)
    }

    async fn drive(
        &self,
        agent: &AgentId,
        instruction: Instruction,
        start_seq: u64,
        progress: &mut LoopProgress,
    ) -> Result<LoopOutcome, SchedulerError> {
        let inserted = self
            .running
            .lock()
            .map_err(|_| SchedulerError::LockPoisoned)?
            .insert(agent.clone());
        assert_single_tick(agent, start_seq, !inserted)?;
        let _guard = RunningGuard {
            running: &self.running,
            agent: agent.clone(),
        };

        let state = self.lifecycle.state(agent);
        assert_not_terminated(agent, start_seq, state)?;
        if state != AgentState::Active {
            return Err(SchedulerError::NotActive {
                agent: agent.clone(),
                state,
            });
        }

        info!(agent = %agent, start_seq, mode = %self.mode(), "Tick loop started");
        let mut seq = start_seq;
        let mut instruction = instruction;

        loop {
            if let Err(e) = self.quota.consume_tick(agent) {
                return Err(self.fault_on_quota(agent, e));
            }

            let output = run_tick(agent, seq, &instruction, self.config.max_steps);
            let hash = self.record_or_verify(agent, seq, &instruction, &output)?;
            progress.state_hashes.push(hash);
            progress.last_seq = Some(seq);
            debug!(agent = %agent, seq, output = output.kind(), "Tick executed");

            match &output {
                TickOutput::PendingTool { tool_name, args } => {
                    self.emit_tick_completed(agent, seq);
                    if let Err(e) = self.quota.consume_tool_call(agent) {
                        return Err(self.fault_on_quota(agent, e));
                    }
                    self.emit(KernelEvent::ToolCallRequested {
                        agent_id: agent.clone(),
                        tool_name: tool_name.clone(),
                        timestamp: self.log.now_ms(),
                    });
                    let result = self.tools.execute(agent, seq, tool_name, args.clone()).await?;
                    instruction = Instruction::Return { value: result };
                    seq += 1;
                }
                TickOutput::Completed { .. } => {
                    self.emit_tick_completed(agent, seq);
                    self.lifecycle.transition(agent, TransitionTrigger::Complete, None)?;
                    self.lifecycle.transition(agent, TransitionTrigger::TeardownOk, None)?;
                    return Ok(self.outcome(agent, output, seq, progress.state_hashes.clone()));
                }
                TickOutput::PendingDelegation { target, .. } => {
                    self.emit_tick_completed(agent, seq);
                    self.lifecycle.transition(
                        agent,
                        TransitionTrigger::Yield,
                        Some(json!({ "delegationTarget": target })),
                    )?;
                    return Ok(self.outcome(agent, output, seq, progress.state_hashes.clone()));
                }
                TickOutput::Failed { error } => {
                    warn!(agent = %agent, seq, %error, "Tick failed");
                    self.emit(KernelEvent::TickFailed {
                        agent_id: agent.clone(),
                        tick_seq: seq,
                        reason: error.clone(),
                        timestamp: self.log.now_ms(),
                    });
                    self.lifecycle.transition(
                        agent,
                        TransitionTrigger::Error,
                        Some(json!({ "error": error })),
                    )?;
                    return Ok(self.outcome(agent, output, seq, progress.state_hashes.clone()));
                }
            }
        }
    }

    /// LIVE: append `TICK_OUTPUT`. REPLAY: compare with the recorded hash.
    ///
    /// In REPLAY the recorded entry is located first and persistent memory
    /// is brought forward to it, so the hashed snapshot is the one LIVE saw.
    fn record_or_verify(
        &self,
        agent: &AgentId,
        seq: u64,
        instruction: &Instruction,
        output: &TickOutput,
    ) -> Result<String, SchedulerError> {
        let recorded = if self.mode().is_replay() {
            let entry = self.replay.recorded_tick(agent, seq)?;
            self.persistent.advance_from_log(agent, entry.bus_seq)?;
            Some(entry)
        } else {
            None
        };

        let hash = state_hash(&HashedState {
            output,
            lifecycle: self.lifecycle.state(agent),
            memory: self.persistent.snapshot(agent),
        })?;

        match recorded {
            Some(entry) => self.replay.check_hash(agent, &entry, &hash)?,
            None => {
                self.log.append(
                    agent,
                    LogPayload::TickOutput(TickRecord {
                        sequence_number: seq,
                        instruction: instruction.clone(),
                        output: output.clone(),
                        state_hash: hash.clone(),
                    }),
                )?;
            }
        }
        Ok(hash)
    }

    fn fault_on_quota(&self, agent: &AgentId, error: QuotaError) -> SchedulerError {
        let meta = match &error {
            QuotaError::Exceeded {
                resource, limit, ..
            } => json!({ "quotaExceeded": resource.to_string(), "limit": limit }),
            QuotaError::LockPoisoned => json!({ "quotaExceeded": "unknown" }),
        };
        match self
            .lifecycle
            .transition(agent, TransitionTrigger::Error, Some(meta))
        {
            Ok(_) => error.into(),
            Err(lifecycle) => {
                warn!(agent = %agent, quota = %error, %lifecycle, "Quota fault transition failed");
                SchedulerError::QuotaFaultFailed {
                    quota: error,
                    lifecycle,
                }
            }
        }
    }

    fn outcome(
        &self,
        agent: &AgentId,
        output: TickOutput,
        last_seq: u64,
        state_hashes: Vec<String>,
    ) -> LoopOutcome {
        let state = self.lifecycle.state(agent);
        info!(
            agent = %agent,
            output = output.kind(),
            state = %state,
            ticks = state_hashes.len(),
            "Tick loop finished"
        );
        LoopOutcome {
            agent_id: agent.clone(),
            output,
            state,
            ticks: state_hashes.len() as u64,
            last_seq,
            state_hashes,
        }
    }

    fn emit_tick_completed(&self, agent: &AgentId, seq: u64) {
        self.emit(KernelEvent::TickCompleted {
            agent_id: agent.clone(),
            tick_seq: seq,
            timestamp: self.log.now_ms(),
        });
    }

    fn emit(&self, event: KernelEvent) {
        if let Some(bus) = &self.bus {
            bus.publish(&event);
        }
    }
}
