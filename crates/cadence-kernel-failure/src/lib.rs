//! Failure handling for the Cadence kernel.
//!
//! [`FailureHandler::handle`] always records the failure first, then applies
//! the policy of its class:
//!
//! | class | outcome |
//! |---|---|
//! | `TRANSIENT` | retry scheduled; PERMANENT once the retry bound is passed |
//! | `PERMANENT` | agent FAULTED, parent notified |
//! | `POLICY_VIOLATION` | tick halted, lifecycle untouched |
//! | `INVARIANT_BREACH` | agent TERMINATED, delegation subtree revoked, kernel panic logged |
//!
//! Unrecognized classes take the `INVARIANT_BREACH` path.
//!
//! The [`invariants`] module holds the runtime assertions whose violations
//! are handed to the handler as ready-made `INVARIANT_BREACH` events.

pub mod error;
pub mod handler;
pub mod invariants;

pub use error::FailureError;
pub use handler::{FailureConfig, FailureDisposition, FailureHandler};
pub use invariants::InvariantError;
