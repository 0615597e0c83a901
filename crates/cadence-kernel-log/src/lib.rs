//! Execution log for the Cadence kernel.
//!
//! The [`ExecutionLog`] is the write-ahead log every other component writes
//! through. Entries are immutable once appended and carry a `busSeq` that is
//! strictly increasing across all agents, starts at 1 and is never reused.
//!
//! Durability is a decorator: a [`LogSink`] attached to the log receives each
//! entry before it becomes visible. [`JsonlSink`] writes one JSON record per
//! line, and [`ExecutionLog::open_jsonl`] reloads such a file and keeps
//! appending to it.
//!
//! The [`KernelBus`] is the synchronous publish/subscribe channel for
//! kernel-level notifications. It is diagnostic; the log is the audit record.

pub mod bus;
pub mod entry;
pub mod error;
pub mod log;
pub mod sink;

pub use bus::{KernelBus, KernelEvent, KernelEventKind, SubscriptionId};
pub use entry::{
    ChildFailureRecord, DelegationIssuedRecord, DelegationRevokedRecord, FailureRecord,
    KernelPanicRecord, LifecycleRecord, LogEntry, LogKind, LogPayload, PermissionRecord,
    PersistentDeleteRecord, PersistentWriteRecord, PolicyHaltRecord, RetryRecord,
    SharedReadRecord, SharedWriteRecord, TickRecord, ToolErrorRecord, ToolResultRecord,
};
pub use error::LogError;
pub use log::ExecutionLog;
pub use sink::{read_jsonl, JsonlSink, LogSink, MemorySink, SegmentFile, SyncMode};
