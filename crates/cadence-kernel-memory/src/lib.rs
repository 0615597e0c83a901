//! Memory scopes for Cadence agents.
//!
//! - [`EphemeralStore`]: scoped to one `(agent, tickSeq)`; gone when the tick
//!   is destroyed unless explicitly checkpointed.
//! - [`PersistentStore`]: per-agent keys that outlive ticks. Every write and
//!   delete is appended to the execution log before the store changes.
//! - [`SharedStore`]: namespaces visible to every agent, gated by the
//!   permission model on `shared/{namespace}/{key}`.
//!
//! Values are JSON ([`serde_json::Value`]). Anything that does not serialize
//! to JSON is rejected with [`MemoryError::NotSerializable`] before any
//! mutation. Reads hand out owned copies, never references into a store.

pub mod ephemeral;
pub mod error;
pub mod persistent;
pub mod shared;

use serde::{Deserialize, Serialize};

use cadence_types::TxId;

pub use ephemeral::{EphemeralHandle, EphemeralStore};
pub use error::MemoryError;
pub use persistent::PersistentStore;
pub use shared::SharedStore;

/// Acknowledgement of a logged memory mutation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WriteResult {
    pub success: bool,
    pub tx_id: TxId,
    /// Timestamp of the log entry recording the mutation.
    pub timestamp: u64,
    pub bus_seq: u64,
}
