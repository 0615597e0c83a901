//! Governance: permission evaluation and capability delegation.
//!
//! ## Permission model
//!
//! An action on a resource is considered only if at least one non-expired
//! grant covers it; otherwise the answer is `DENY` with reason
//! `NO_VALID_GRANT`. The policy chain is then folded left to right from
//! `ALLOW`: an explicit `DENY` halts immediately, `ESCALATE` upgrades the
//! running result but never overrides a later `DENY`. Every evaluation is
//! written to the log as `PERMISSION_EVALUATION`.
//!
//! ## Delegation
//!
//! Tokens form a forest rooted at agents created with
//! [`DelegationProtocol::init_root`]. Each hop strictly shrinks the grant set,
//! depth budget and time-to-live. Revocation is immediate and cascades
//! through the whole subtree.

pub mod delegation;
pub mod error;
pub mod permission;

pub use delegation::{DelegationNode, DelegationProtocol, DelegationResponse, RejectionReason};
pub use error::GovernanceError;
pub use permission::{PermissionModel, Policy, NO_VALID_GRANT};
