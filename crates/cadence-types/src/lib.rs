//! Core type definitions for the Cadence deterministic tick kernel.
//!
//! This crate provides the types shared by every kernel crate. No business
//! logic beyond pure helpers: the lifecycle transition table, grant
//! coverage rules and the canonical state hash live here so that every
//! component agrees on them byte-for-byte.

pub mod canonical;
pub mod clock;
pub mod failure;
pub mod grant;
pub mod ids;
pub mod instruction;
pub mod mode;
pub mod state;
pub mod token;

// Re-export primary types at crate root for ergonomic use.
pub use canonical::{canonical_eq, canonical_json, canonicalize, state_hash, CanonicalError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use failure::{FailureClass, FailureEvent, RecoveryRecord};
pub use grant::{action_covers, resource_covers, PermissionGrant, PolicyDecision};
pub use ids::{AgentId, TokenId, TxId};
pub use instruction::{Instruction, TickOutput};
pub use mode::KernelMode;
pub use state::{AgentState, LifecycleTransition, TransitionTrigger, TRANSITIONS};
pub use token::{DelegationRequest, DelegationToken};
