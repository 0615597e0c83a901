//! Execution layer of the Cadence kernel.
//!
//! - [`run_tick`]: pure single-step interpreter, one [`Instruction`] in, one
//!   [`TickOutput`] out.
//! - [`Scheduler`]: the per-agent tick loop. It consumes quota, runs ticks,
//!   hashes post-tick state and either records it (LIVE) or checks it against
//!   the log (REPLAY), then dispatches on the output.
//! - [`ToolGate`]: the boundary to external tools. LIVE calls a registered
//!   [`ToolHandler`] and logs `TOOL_RESULT`; REPLAY returns the recorded
//!   result without calling anything.
//! - [`ReplayController`]: output-level replay verification.
//! - [`QuotaEnforcer`]: per-agent tick and tool-call budgets.
//!
//! [`Instruction`]: cadence_types::Instruction
//! [`TickOutput`]: cadence_types::TickOutput

pub mod error;
pub mod provider;
pub mod quota;
pub mod replay;
pub mod scheduler;
pub mod tick;
pub mod tools;

pub use error::{ProviderError, QuotaError, ReplayError, SchedulerError, ToolError, ToolFailure};
pub use provider::{InstructionProvider, ScriptedProvider};
pub use quota::{QuotaEnforcer, QuotaResource, ResourceConsumption, ResourceQuota};
pub use replay::{AgentTrace, ReplayController, TraceIndex};
pub use scheduler::{LoopOutcome, LoopProgress, Scheduler, SchedulerConfig};
pub use tick::{run_tick, TICK_OVERFLOW, UNKNOWN_INSTRUCTION};
pub use tools::{FnTool, ToolGate, ToolHandler, ToolManifest, ToolRegistry};
