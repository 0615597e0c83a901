use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tracing::{info, warn};

use cadence_kernel_log::{ExecutionLog, KernelBus, KernelEvent, LifecycleRecord, LogPayload};
use cadence_types::{
    AgentId, AgentState, KernelMode, LifecycleTransition, TransitionTrigger, TRANSITIONS,
};

use crate::error::LifecycleError;

#[derive(Default)]
struct AgentRecord {
    state: Option<AgentState>,
    history: Vec<LifecycleTransition>,
}

impl AgentRecord {
    fn current(&self) -> AgentState {
        self.state.unwrap_or(AgentState::Defined)
    }
}

/// Owns every agent's current state and transition history.
pub struct LifecycleController {
    mode: KernelMode,
    log: Arc<ExecutionLog>,
    bus: Option<Arc<KernelBus>>,
    agents: Mutex<HashMap<AgentId, AgentRecord>>,
}

impl LifecycleController {
    pub fn new(log: Arc<ExecutionLog>, mode: KernelMode) -> Self {
        Self {
            mode,
            log,
            bus: None,
            agents: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Arc<KernelBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn mode(&self) -> KernelMode {
        self.mode
    }

    /// Current state. Never fails: unknown agents are `DEFINED`.
    pub fn state(&self, agent: &AgentId) -> AgentState {
        self.agents
            .lock()
            .map(|agents| agents.get(agent).map(AgentRecord::current))
            .ok()
            .flatten()
            .unwrap_or(AgentState::Defined)
    }

    pub fn is_in(&self, agent: &AgentId, states: &[AgentState]) -> bool {
        states.contains(&self.state(agent))
    }

    /// Applied transitions for `agent`, oldest first.
    pub fn history(&self, agent: &AgentId) -> Vec<LifecycleTransition> {
        self.agents
            .lock()
            .map(|agents| {
                agents
                    .get(agent)
                    .map(|r| r.history.clone())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    /// Agents the controller has seen, sorted by id.
    pub fn agents(&self) -> Vec<AgentId> {
        let mut ids: Vec<AgentId> = self
            .agents
            .lock()
            .map(|agents| agents.keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Apply `trigger` to `agent` and return the new state.
    pub fn transition(
        &self,
        agent: &AgentId,
        trigger: TransitionTrigger,
        meta: Option<Value>,
    ) -> Result<AgentState, LifecycleError> {
        let applied = {
            let mut agents = self.agents.lock().map_err(|_| LifecycleError::LockPoisoned)?;
            self.apply(&mut agents, agent, trigger, meta)?
        };
        self.announce(agent, &applied);
        Ok(applied.to)
    }

    /// Drive `agent` to `target` along failure edges only.
    ///
    /// The current state is read and the whole path applied under one lock
    /// acquisition, so a concurrent transition cannot invalidate the plan.
    /// Each step is an ordinary logged transition. Returns the applied
    /// triggers; empty when the agent is already at `target`.
    pub fn escalate_to(
        &self,
        agent: &AgentId,
        target: AgentState,
    ) -> Result<Vec<TransitionTrigger>, LifecycleError> {
        let mut applied = Vec::new();
        let outcome = {
            let mut agents = self.agents.lock().map_err(|_| LifecycleError::LockPoisoned)?;
            let from = agents.get(agent).map(AgentRecord::current).unwrap_or(AgentState::Defined);
            match failure_path(from, target) {
                Some(path) => {
                    let mut outcome = Ok(());
                    for trigger in path {
                        let meta = Some(json!({ "escalation": target }));
                        match self.apply(&mut agents, agent, trigger, meta) {
                            Ok(step) => applied.push(step),
                            Err(e) => {
                                outcome = Err(e);
                                break;
                            }
                        }
                    }
                    outcome
                }
                None => Err(LifecycleError::Unreachable {
                    agent: agent.clone(),
                    from,
                    target,
                }),
            }
        };
        for step in &applied {
            self.announce(agent, step);
        }
        outcome.map(|()| applied.iter().map(|step| step.trigger).collect())
    }

    /// Check `trigger` against the table, log it, then mutate. The caller
    /// holds the agents lock. A failed append leaves the agent untouched.
    fn apply(
        &self,
        agents: &mut HashMap<AgentId, AgentRecord>,
        agent: &AgentId,
        trigger: TransitionTrigger,
        meta: Option<Value>,
    ) -> Result<LifecycleTransition, LifecycleError> {
        let from = agents.get(agent).map(AgentRecord::current).unwrap_or(AgentState::Defined);
        let to = from.next(trigger).ok_or_else(|| LifecycleError::InvalidTransition {
            agent: agent.clone(),
            from,
            trigger,
        })?;

        let (bus_seq, timestamp) = if self.mode.is_live() {
            let entry = self.log.append(
                agent,
                LogPayload::LifecycleTransition(LifecycleRecord {
                    from,
                    to,
                    trigger,
                    meta: meta.clone(),
                }),
            )?;
            (Some(entry.bus_seq), entry.timestamp)
        } else {
            (None, self.log.now_ms())
        };

        let record = agents.entry(agent.clone()).or_default();
        record.state = Some(to);
        let applied = LifecycleTransition {
            from,
            to,
            trigger,
            timestamp,
            bus_seq,
            meta,
        };
        record.history.push(applied.clone());
        Ok(applied)
    }

    fn announce(&self, agent: &AgentId, applied: &LifecycleTransition) {
        info!(
            agent = %agent,
            from = %applied.from,
            to = %applied.to,
            trigger = %applied.trigger,
            "Lifecycle transition"
        );
        self.emit(agent, applied);
    }

    /// Set `agent`'s state without consulting the transition table.
    ///
    /// Replay bootstrap only. Nothing is appended to the log; the change is
    /// recorded in history with trigger `force` and a `forced` marker.
    pub fn force_state(&self, agent: &AgentId, state: AgentState, reason: &str) -> LifecycleTransition {
        let mut agents = self.agents.lock().unwrap_or_else(|e| e.into_inner());
        let record = agents.entry(agent.clone()).or_default();
        let from = record.current();
        let forced = LifecycleTransition {
            from,
            to: state,
            trigger: TransitionTrigger::Force,
            timestamp: self.log.now_ms(),
            bus_seq: None,
            meta: Some(json!({ "forced": true, "reason": reason })),
        };
        record.state = Some(state);
        record.history.push(forced.clone());
        warn!(agent = %agent, from = %from, to = %state, reason, "Lifecycle state forced");
        forced
    }

    /// Rebuild `agent`'s state and history from recorded transitions.
    ///
    /// Folds every `LIFECYCLE_TRANSITION` entry for the agent whose `busSeq`
    /// is below `before_seq` (all of them when `None`), validating each
    /// against the table. Nothing is appended.
    pub fn restore_from_log(
        &self,
        agent: &AgentId,
        before_seq: Option<u64>,
    ) -> Result<AgentState, LifecycleError> {
        let mut state = AgentState::Defined;
        let mut history = Vec::new();
        for entry in self.log.entries_for_agent(agent) {
            if before_seq.is_some_and(|bound| entry.bus_seq >= bound) {
                break;
            }
            let Some(record) = entry.as_lifecycle() else {
                continue;
            };
            if record.from != state || state.next(record.trigger) != Some(record.to) {
                return Err(LifecycleError::InconsistentHistory {
                    agent: agent.clone(),
                    seq: entry.bus_seq,
                    reason: format!(
                        "{} --{}--> {} does not follow {}",
                        record.from, record.trigger, record.to, state
                    ),
                });
            }
            state = record.to;
            history.push(LifecycleTransition {
                from: record.from,
                to: record.to,
                trigger: record.trigger,
                timestamp: entry.timestamp,
                bus_seq: Some(entry.bus_seq),
                meta: record.meta.clone(),
            });
        }

        let mut agents = self.agents.lock().map_err(|_| LifecycleError::LockPoisoned)?;
        let restored = history.len();
        agents.insert(
            agent.clone(),
            AgentRecord {
                state: Some(state),
                history,
            },
        );
        info!(agent = %agent, state = %state, transitions = restored, "Lifecycle restored from log");
        Ok(state)
    }

    fn emit(&self, agent: &AgentId, applied: &LifecycleTransition) {
        let Some(bus) = &self.bus else {
            return;
        };
        if applied.trigger == TransitionTrigger::Spawn {
            bus.publish(&KernelEvent::AgentSpawned {
                agent_id: agent.clone(),
                timestamp: applied.timestamp,
            });
        }
        bus.publish(&KernelEvent::LifecycleTransition {
            agent_id: agent.clone(),
            from: applied.from,
            to: applied.to,
            timestamp: applied.timestamp,
        });
    }
}

/// Shortest trigger sequence from `from` to `target` using failure edges.
fn failure_path(from: AgentState, target: AgentState) -> Option<Vec<TransitionTrigger>> {
    if from == target {
        return Some(Vec::new());
    }
    let mut queue = VecDeque::from([(from, Vec::new())]);
    let mut seen = HashSet::from([from]);
    while let Some((state, path)) = queue.pop_front() {
        for (src, trigger, dst) in TRANSITIONS {
            if *src != state || !trigger.is_failure_edge() || !seen.insert(*dst) {
                continue;
            }
            let mut next = path.clone();
            next.push(*trigger);
            if *dst == target {
                return Some(next);
            }
            queue.push_back((*dst, next));
        }
    }
    None
}
