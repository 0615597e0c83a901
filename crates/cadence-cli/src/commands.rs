use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use serde_json::{json, Value};
use tracing::info;

use cadence_kernel::{
    verify_log, AgentIdentity, FnTool, Kernel, KernelConfig, ToolManifest, Verdict,
};
use cadence_kernel_log::{read_jsonl, ExecutionLog, LogEntry, LogKind};
use cadence_types::{AgentId, Instruction, KernelMode, PermissionGrant};

fn load(path: &Path) -> anyhow::Result<Vec<LogEntry>> {
    read_jsonl(path).with_context(|| format!("reading {}", path.display()))
}

fn parse_kind(kind: &str) -> anyhow::Result<LogKind> {
    serde_json::from_value(Value::String(kind.to_uppercase()))
        .with_context(|| format!("unknown log kind {kind}"))
}

/// Entries of `entries` matching the optional agent and kind filters.
pub fn select<'a>(
    entries: &'a [LogEntry],
    agent: Option<&str>,
    kind: Option<LogKind>,
) -> Vec<&'a LogEntry> {
    entries
        .iter()
        .filter(|e| agent.map_or(true, |a| e.agent_id.as_str() == a))
        .filter(|e| kind.map_or(true, |k| e.kind() == k))
        .collect()
}

pub fn inspect(path: &Path, agent: Option<&str>, kind: Option<&str>) -> anyhow::Result<()> {
    let entries = load(path)?;
    let kind = kind.map(parse_kind).transpose()?;
    let selected = select(&entries, agent, kind);

    let mut summary: BTreeMap<LogKind, usize> = BTreeMap::new();
    for entry in &selected {
        println!("{}", serde_json::to_string(entry)?);
        *summary.entry(entry.kind()).or_default() += 1;
    }

    println!();
    println!("{} of {} entries", selected.len(), entries.len());
    for (kind, count) in summary {
        println!("  {:<28} {}", kind.as_str(), count);
    }
    Ok(())
}

/// Returns whether every verified agent is clean.
pub async fn verify(path: &Path, config: &KernelConfig, agent: Option<&str>) -> anyhow::Result<bool> {
    let log = Arc::new(ExecutionLog::from_entries(load(path)?)?);
    let only = agent.map(AgentId::from);
    let report = verify_log(log, config, only.as_ref()).await?;

    if report.agents.is_empty() {
        println!("no recorded ticks to verify");
    }
    for result in &report.agents {
        let line = match &result.verdict {
            Verdict::Verified { ticks, loops, .. } => {
                format!("VERIFIED  {ticks} ticks replayed in {loops} loop(s)")
            }
            Verdict::Incomplete { ticks, recorded } => {
                format!("PARTIAL   {ticks} of {recorded} recorded ticks replayed")
            }
            Verdict::Diverged { detail, .. } => format!("DIVERGED  {detail}"),
            Verdict::Failed { detail } => format!("FAILED    {detail}"),
        };
        println!("{:<24} {}", result.agent_id.as_str(), line);
    }
    Ok(report.is_clean())
}

pub async fn demo(out: &Path, config: KernelConfig, agent: &str) -> anyhow::Result<()> {
    if config.mode != KernelMode::Live {
        bail!("demo records history and needs a live kernel");
    }
    let mut config = config;
    config.log.path = Some(out.to_path_buf());
    let kernel = Kernel::new(config)?;

    kernel.register_tool(
        ToolManifest::new("echo", "Return the arguments unchanged")
            .with_parameters(json!({ "type": "object" })),
        Arc::new(FnTool::new(|_: &AgentId, args: Value| Ok(args))),
    )?;
    kernel.spawn_agent(
        AgentIdentity::new(agent, "demo").with_name("Demo agent"),
        vec![PermissionGrant::all()],
    )?;

    let id = AgentId::from(agent);
    let outcome = kernel
        .run_agent(&id, Instruction::call_tool("echo", json!({ "greeting": "hello" })))
        .await?;
    kernel.flush()?;

    info!(agent, path = %out.display(), ticks = outcome.ticks, "Demo session recorded");
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn demo_output_verifies_and_inspects() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("demo.jsonl");
        demo(&path, KernelConfig::default(), "demo").await.unwrap();

        assert!(verify(&path, &KernelConfig::default(), None).await.unwrap());
        inspect(&path, Some("demo"), Some("tick_output")).unwrap();

        let entries = load(&path).unwrap();
        let ticks = select(&entries, Some("demo"), Some(LogKind::TickOutput));
        assert_eq!(ticks.len(), 2);
        assert!(select(&entries, Some("other"), None).is_empty());
    }

    #[test]
    fn kind_filter_is_case_insensitive() {
        assert_eq!(parse_kind("tool_result").unwrap(), LogKind::ToolResult);
        assert!(parse_kind("nonsense").is_err());
    }

    #[tokio::test]
    async fn demo_refuses_replay_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = KernelConfig {
            mode: KernelMode::Replay,
            ..KernelConfig::default()
        };
        assert!(demo(&dir.path().join("x.jsonl"), config, "demo").await.is_err());
    }
}
