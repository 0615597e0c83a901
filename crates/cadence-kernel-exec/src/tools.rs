use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use cadence_kernel_log::{ExecutionLog, LogPayload, ToolErrorRecord, ToolResultRecord};
use cadence_types::{AgentId, KernelMode};

use crate::error::{ToolError, ToolFailure};
use crate::replay::TraceIndex;

/// An external tool.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, agent: &AgentId, args: Value) -> Result<Value, ToolFailure>;
}

/// Adapts a synchronous closure into a [`ToolHandler`].
pub struct FnTool<F>(F);

impl<F> FnTool<F>
where
    F: Fn(&AgentId, Value) -> Result<Value, ToolFailure> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> ToolHandler for FnTool<F>
where
    F: Fn(&AgentId, Value) -> Result<Value, ToolFailure> + Send + Sync,
{
    async fn call(&self, agent: &AgentId, args: Value) -> Result<Value, ToolFailure> {
        (self.0)(agent, args)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolManifest {
    pub name: String,
    pub description: String,
    /// JSON schema of the arguments.
    #[serde(default)]
    pub parameters: Value,
}

impl ToolManifest {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Value::Object(Default::default()),
        }
    }

    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = parameters;
        self
    }
}

struct RegisteredTool {
    manifest: ToolManifest,
    handler: Arc<dyn ToolHandler>,
}

/// Name-unique set of tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<BTreeMap<String, RegisteredTool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        manifest: ToolManifest,
        handler: Arc<dyn ToolHandler>,
    ) -> Result<(), ToolError> {
        let mut tools = self.tools.write().map_err(|_| ToolError::LockPoisoned)?;
        if tools.contains_key(&manifest.name) {
            return Err(ToolError::AlreadyRegistered(manifest.name));
        }
        debug!(tool = %manifest.name, "Tool registered");
        tools.insert(manifest.name.clone(), RegisteredTool { manifest, handler });
        Ok(())
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.read().ok()?.get(name).map(|t| t.handler.clone())
    }

    pub fn manifest(&self, name: &str) -> Option<ToolManifest> {
        self.tools.read().ok()?.get(name).map(|t| t.manifest.clone())
    }

    /// Manifests sorted by name.
    pub fn list(&self) -> Vec<ToolManifest> {
        self.tools
            .read()
            .map(|tools| tools.values().map(|t| t.manifest.clone()).collect())
            .unwrap_or_default()
    }
}

/// Boundary between the tick loop and external tools.
///
/// LIVE records every call as `TOOL_RESULT` or `TOOL_ERROR`. REPLAY answers
/// from those records and never reaches a handler.
pub struct ToolGate {
    log: Arc<ExecutionLog>,
    recorded: TraceIndex,
    registry: Arc<ToolRegistry>,
    mode: KernelMode,
    timeout: Option<Duration>,
}

impl ToolGate {
    pub fn new(log: Arc<ExecutionLog>, registry: Arc<ToolRegistry>, mode: KernelMode) -> Self {
        Self {
            recorded: TraceIndex::new(log.clone()),
            log,
            registry,
            mode,
            timeout: None,
        }
    }

    /// Bound every LIVE handler call.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub async fn execute(
        &self,
        agent: &AgentId,
        sequence_number: u64,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        match self.mode {
            KernelMode::Live => self.execute_live(agent, sequence_number, tool_name, args).await,
            KernelMode::Replay => self.recorded_result(agent, sequence_number, tool_name),
        }
    }

    async fn execute_live(
        &self,
        agent: &AgentId,
        sequence_number: u64,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let result = match self.call_handler(agent, sequence_number, tool_name, args.clone()).await {
            Ok(result) => result,
            Err(error) => {
                self.log.append(
                    agent,
                    LogPayload::ToolError(ToolErrorRecord {
                        sequence_number,
                        tool_name: tool_name.to_string(),
                        args,
                        code: error.code().to_string(),
                        message: error.to_string(),
                    }),
                )?;
                return Err(error);
            }
        };

        self.log.append(
            agent,
            LogPayload::ToolResult(ToolResultRecord {
                sequence_number,
                tool_name: tool_name.to_string(),
                args,
                result: result.clone(),
            }),
        )?;
        debug!(agent = %agent, tool = tool_name, seq = sequence_number, "Tool result recorded");
        Ok(result)
    }

    async fn call_handler(
        &self,
        agent: &AgentId,
        sequence_number: u64,
        tool_name: &str,
        args: Value,
    ) -> Result<Value, ToolError> {
        let handler = self
            .registry
            .handler(tool_name)
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()))?;

        let call = handler.call(agent, args);
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, call).await.map_err(|_| ToolError::Timeout {
                tool: tool_name.to_string(),
                timeout_ms: limit.as_millis() as u64,
            })?,
            None => call.await,
        };
        outcome.map_err(|failure| {
            warn!(agent = %agent, tool = tool_name, seq = sequence_number, %failure, "Tool call failed");
            ToolError::Handler {
                tool: tool_name.to_string(),
                failure,
            }
        })
    }

    fn recorded_result(
        &self,
        agent: &AgentId,
        sequence_number: u64,
        tool_name: &str,
    ) -> Result<Value, ToolError> {
        let trace = self.recorded.trace(agent);
        match trace.tool_outcome(sequence_number).map(|e| &e.payload) {
            Some(LogPayload::ToolResult(record)) if record.tool_name == tool_name => {
                Ok(record.result.clone())
            }
            Some(LogPayload::ToolError(record)) if record.tool_name == tool_name => {
                Err(ToolError::Recorded {
                    tool: record.tool_name.clone(),
                    seq: sequence_number,
                    code: record.code.clone(),
                    message: record.message.clone(),
                })
            }
            _ => Err(ToolError::MissingReplayResult {
                agent: agent.clone(),
                seq: sequence_number,
                tool: tool_name.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting(Arc<AtomicUsize>);

    #[async_trait]
    impl ToolHandler for Counting {
        async fn call(&self, _agent: &AgentId, args: Value) -> Result<Value, ToolFailure> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(json!({ "echo": args }))
        }
    }

    struct Slow;

    #[async_trait]
    impl ToolHandler for Slow {
        async fn call(&self, _agent: &AgentId, _args: Value) -> Result<Value, ToolFailure> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    fn registry_with_echo(calls: Arc<AtomicUsize>) -> Arc<ToolRegistry> {
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(ToolManifest::new("echo", "Echo the arguments"), Arc::new(Counting(calls)))
            .unwrap();
        registry
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = registry_with_echo(Arc::new(AtomicUsize::new(0)));
        let err = registry
            .register(
                ToolManifest::new("echo", "again"),
                Arc::new(FnTool::new(|_: &AgentId, v: Value| Ok(v))),
            )
            .unwrap_err();
        assert!(matches!(err, ToolError::AlreadyRegistered(name) if name == "echo"));
        assert_eq!(registry.list().len(), 1);
        assert_eq!(registry.manifest("echo").unwrap().description, "Echo the arguments");
    }

    #[tokio::test]
    async fn live_calls_handler_and_logs_result() {
        let calls = Arc::new(AtomicUsize::new(0));
        let log = Arc::new(ExecutionLog::new());
        let gate = ToolGate::new(log.clone(), registry_with_echo(calls.clone()), KernelMode::Live);
        let a = AgentId::from("a");

        let out = gate.execute(&a, 2, "echo", json!("hi")).await.unwrap();
        assert_eq!(out, json!({"echo": "hi"}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let record = log.entries()[0].as_tool_result().unwrap().clone();
        assert_eq!(record.sequence_number, 2);
        assert_eq!(record.tool_name, "echo");
        assert_eq!(record.args, json!("hi"));
    }

    #[tokio::test]
    async fn unknown_tool_is_an_error() {
        let log = Arc::new(ExecutionLog::new());
        let gate = ToolGate::new(log.clone(), Arc::new(ToolRegistry::new()), KernelMode::Live);
        let err = gate
            .execute(&AgentId::from("a"), 1, "nope", Value::Null)
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("TOOL_NOT_FOUND"));
        let record = log.entries()[0].as_tool_error().unwrap().clone();
        assert_eq!(record.code, "TOOL_NOT_FOUND");
        assert_eq!(record.tool_name, "nope");
    }

    #[tokio::test]
    async fn handler_failure_is_recorded_and_replayed() {
        let log = Arc::new(ExecutionLog::new());
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(
                ToolManifest::new("flaky", "Always fails"),
                Arc::new(FnTool::new(|_: &AgentId, _: Value| Err(ToolFailure::from("disk full")))),
            )
            .unwrap();
        let gate = ToolGate::new(log.clone(), registry, KernelMode::Live);
        let err = gate
            .execute(&AgentId::from("a"), 1, "flaky", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Handler { ref failure, .. } if failure.0 == "disk full"));
        assert_eq!(log.len(), 1);
        let record = log.entries()[0].as_tool_error().unwrap().clone();
        assert_eq!((record.sequence_number, record.code.as_str()), (1, "TOOL_FAILED"));
        assert!(record.message.contains("disk full"));

        let recorded: Vec<_> = log.entries().iter().map(|e| (**e).clone()).collect();
        let replay = ToolGate::new(
            Arc::new(ExecutionLog::from_entries(recorded).unwrap()),
            Arc::new(ToolRegistry::new()),
            KernelMode::Replay,
        );
        let replayed = replay
            .execute(&AgentId::from("a"), 1, "flaky", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(replayed, ToolError::Recorded { ref code, seq: 1, .. } if code == "TOOL_FAILED"));
        // A different tool at the same tick was never recorded.
        let other = replay
            .execute(&AgentId::from("a"), 1, "echo", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(other, ToolError::MissingReplayResult { .. }));
    }

    #[tokio::test]
    async fn slow_handler_times_out() {
        let log = Arc::new(ExecutionLog::new());
        let registry = Arc::new(ToolRegistry::new());
        registry
            .register(ToolManifest::new("slow", "Sleeps"), Arc::new(Slow))
            .unwrap();
        let gate = ToolGate::new(log.clone(), registry, KernelMode::Live)
            .with_timeout(Duration::from_millis(10));
        let err = gate
            .execute(&AgentId::from("a"), 1, "slow", Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_ms: 10, .. }));
        assert_eq!(log.entries()[0].as_tool_error().unwrap().code, "TOOL_TIMEOUT");
    }

    #[tokio::test]
    async fn replay_returns_recorded_result_without_calling() {
        let calls = Arc::new(AtomicUsize::new(0));
        let live_log = Arc::new(ExecutionLog::new());
        let a = AgentId::from("a");
        ToolGate::new(live_log.clone(), registry_with_echo(calls.clone()), KernelMode::Live)
            .execute(&a, 1, "echo", json!(7))
            .await
            .unwrap();

        let recorded: Vec<_> = live_log.entries().iter().map(|e| (**e).clone()).collect();
        let replay_log = Arc::new(ExecutionLog::from_entries(recorded).unwrap());
        let gate = ToolGate::new(replay_log.clone(), registry_with_echo(calls.clone()), KernelMode::Replay);

        assert_eq!(gate.execute(&a, 1, "echo", json!(7)).await.unwrap(), json!({"echo": 7}));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(replay_log.len(), 1);

        let missing = gate.execute(&a, 2, "echo", json!(7)).await.unwrap_err();
        assert!(missing.to_string().starts_with("REPLAY_MISSING_TOOL_RESULT"));
        let other_agent = gate.execute(&AgentId::from("b"), 1, "echo", json!(7)).await;
        assert!(matches!(other_agent, Err(ToolError::MissingReplayResult { .. })));
    }
}
