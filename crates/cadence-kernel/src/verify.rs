//! Trace verification: replay every recorded agent and compare hashes.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use cadence_kernel_exec::{SchedulerError, ToolError};
use cadence_kernel_log::ExecutionLog;
use cadence_types::AgentId;

use crate::config::KernelConfig;
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;

/// Result of replaying one agent.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    /// Every recorded tick was replayed and reproduced its hash.
    Verified { ticks: u64, recorded: u64, loops: u64 },
    /// The ticks replay reached matched, but some recorded ticks were never
    /// reached.
    Incomplete { ticks: u64, recorded: u64 },
    Diverged { sequence: Option<u64>, detail: String },
    /// Replay could not be carried out.
    Failed { detail: String },
}

impl Verdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Verified { .. })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentVerification {
    pub agent_id: AgentId,
    pub verdict: Verdict,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    pub agents: Vec<AgentVerification>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.agents.iter().all(|a| a.verdict.is_clean())
    }

    pub fn diverged(&self) -> usize {
        self.agents
            .iter()
            .filter(|a| matches!(a.verdict, Verdict::Diverged { .. }))
            .count()
    }

    pub fn get(&self, agent: &AgentId) -> Option<&Verdict> {
        self.agents
            .iter()
            .find(|a| &a.agent_id == agent)
            .map(|a| &a.verdict)
    }
}

/// Replay every agent with recorded ticks (or only `only`) against `log`.
///
/// Each agent gets its own REPLAY kernel over the shared log, so agents
/// cannot disturb each other's bootstrap state.
pub async fn verify_log(
    log: Arc<ExecutionLog>,
    config: &KernelConfig,
    only: Option<&AgentId>,
) -> KernelResult<VerificationReport> {
    let agents: BTreeSet<AgentId> = log
        .entries()
        .iter()
        .filter(|e| e.as_tick().is_some())
        .map(|e| e.agent_id.clone())
        .filter(|id| only.map_or(true, |o| o == id))
        .collect();

    let mut report = VerificationReport::default();
    for agent in agents {
        let verdict = verify_agent(log.clone(), config, &agent).await;
        match &verdict {
            Verdict::Verified { ticks, loops, .. } => {
                info!(agent = %agent, ticks, loops, "Agent trace verified")
            }
            Verdict::Incomplete { ticks, recorded } => {
                error!(agent = %agent, ticks, recorded, "Agent trace only partly replayed")
            }
            Verdict::Diverged { sequence, detail } => {
                error!(agent = %agent, ?sequence, %detail, "Agent trace diverged")
            }
            Verdict::Failed { detail } => warn!(agent = %agent, %detail, "Agent trace not verifiable"),
        }
        report.agents.push(AgentVerification {
            agent_id: agent,
            verdict,
        });
    }
    Ok(report)
}

async fn verify_agent(log: Arc<ExecutionLog>, config: &KernelConfig, agent: &AgentId) -> Verdict {
    let kernel = Kernel::replay(config.clone(), log);
    match kernel.replay_agent(agent).await {
        Ok(outcome) if outcome.is_complete() => Verdict::Verified {
            ticks: outcome.ticks,
            recorded: outcome.recorded,
            loops: outcome.loops.len() as u64,
        },
        Ok(outcome) => Verdict::Incomplete {
            ticks: outcome.ticks,
            recorded: outcome.recorded,
        },
        Err(KernelError::Scheduler(SchedulerError::Replay(e))) if e.is_divergence() => {
            Verdict::Diverged {
                sequence: e.seq(),
                detail: e.to_string(),
            }
        }
        // The trace goes on past a tool call whose outcome is gone.
        Err(KernelError::Scheduler(SchedulerError::Tool(ToolError::MissingReplayResult {
            agent,
            seq,
            tool,
        }))) => Verdict::Diverged {
            sequence: Some(seq),
            detail: format!(
                "REPLAY_MISSING_TOOL_RESULT: {tool} at tick {seq} of agent {agent} has no recorded outcome but later ticks do"
            ),
        },
        Err(e) => Verdict::Failed {
            detail: e.to_string(),
        },
    }
}
