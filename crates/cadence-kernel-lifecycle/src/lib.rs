//! Agent lifecycle state machine.
//!
//! ## Invariants
//!
//! - Exactly one current state per agent. Unknown agents are `DEFINED`.
//! - A transition succeeds iff `(current, trigger)` is a row of
//!   [`cadence_types::TRANSITIONS`]; otherwise state is unchanged.
//! - In LIVE mode the transition is appended to the execution log *before*
//!   the in-memory state changes. A failed append leaves the state as it was.
//! - `TERMINATED` is a sink.
//! - The only way around the table is [`LifecycleController::force_state`],
//!   which exists for replay bootstrap and is recorded as forced in history.

pub mod controller;
pub mod error;

pub use controller::LifecycleController;
pub use error::LifecycleError;
