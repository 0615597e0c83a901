//! Cadence kernel: every component wired behind one facade.
//!
//! A [`Kernel`] owns one [`ExecutionLog`](cadence_kernel_log::ExecutionLog)
//! and one [`KernelBus`](cadence_kernel_log::KernelBus) and hands them to
//! the lifecycle controller, governance, memory stores, scheduler and
//! failure handler. Its mode is fixed at construction.
//!
//! ```no_run
//! # async fn run() -> Result<(), cadence_kernel::KernelError> {
//! use cadence_kernel::{AgentIdentity, Kernel, KernelConfig};
//! use cadence_types::{Instruction, PermissionGrant};
//!
//! let kernel = Kernel::new(KernelConfig::default())?;
//! kernel.spawn_agent(AgentIdentity::new("planner", "llm"), vec![PermissionGrant::all()])?;
//! let outcome = kernel
//!     .run_agent(&"planner".into(), Instruction::ret(serde_json::json!("done")))
//!     .await?;
//! println!("{:?}", outcome.state_hashes);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod identity;
pub mod kernel;
pub mod telemetry;
pub mod verify;

pub use config::{KernelConfig, LogConfig, QuotaConfig};
pub use error::{KernelError, KernelResult};
pub use identity::{AgentIdentity, AgentRegistry};
pub use kernel::{Kernel, ReplayOutcome, ReplayedLoop, SupervisedOutcome};
pub use telemetry::init_tracing;
pub use verify::{verify_log, AgentVerification, Verdict, VerificationReport};

pub use cadence_kernel_exec::{
    FnTool, InstructionProvider, LoopOutcome, ScriptedProvider, ToolFailure, ToolHandler,
    ToolManifest,
};
pub use cadence_kernel_failure::FailureDisposition;
