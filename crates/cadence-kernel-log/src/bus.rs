use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tracing::debug;

use cadence_types::{AgentId, AgentState};

/// Kernel-level notification published on the [`KernelBus`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelEvent {
    #[serde(rename_all = "camelCase")]
    AgentSpawned { agent_id: AgentId, timestamp: u64 },
    #[serde(rename_all = "camelCase")]
    LifecycleTransition {
        agent_id: AgentId,
        from: AgentState,
        to: AgentState,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    TickCompleted {
        agent_id: AgentId,
        tick_seq: u64,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    TickFailed {
        agent_id: AgentId,
        tick_seq: u64,
        reason: String,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    ToolCallRequested {
        agent_id: AgentId,
        tool_name: String,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    MemoryAccess {
        agent_id: AgentId,
        scope: String,
        action: String,
        key: String,
        timestamp: u64,
    },
    #[serde(rename_all = "camelCase")]
    KernelPanic {
        agent_id: AgentId,
        reason: String,
        timestamp: u64,
    },
}

/// Subscription filter key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KernelEventKind {
    AgentSpawned,
    LifecycleTransition,
    TickCompleted,
    TickFailed,
    ToolCallRequested,
    MemoryAccess,
    KernelPanic,
}

impl KernelEvent {
    pub fn kind(&self) -> KernelEventKind {
        match self {
            KernelEvent::AgentSpawned { .. } => KernelEventKind::AgentSpawned,
            KernelEvent::LifecycleTransition { .. } => KernelEventKind::LifecycleTransition,
            KernelEvent::TickCompleted { .. } => KernelEventKind::TickCompleted,
            KernelEvent::TickFailed { .. } => KernelEventKind::TickFailed,
            KernelEvent::ToolCallRequested { .. } => KernelEventKind::ToolCallRequested,
            KernelEvent::MemoryAccess { .. } => KernelEventKind::MemoryAccess,
            KernelEvent::KernelPanic { .. } => KernelEventKind::KernelPanic,
        }
    }

    pub fn agent_id(&self) -> &AgentId {
        match self {
            KernelEvent::AgentSpawned { agent_id, .. }
            | KernelEvent::LifecycleTransition { agent_id, .. }
            | KernelEvent::TickCompleted { agent_id, .. }
            | KernelEvent::TickFailed { agent_id, .. }
            | KernelEvent::ToolCallRequested { agent_id, .. }
            | KernelEvent::MemoryAccess { agent_id, .. }
            | KernelEvent::KernelPanic { agent_id, .. } => agent_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

type Handler = Arc<dyn Fn(&KernelEvent) + Send + Sync>;

struct Subscription {
    id: SubscriptionId,
    /// `None` receives every event.
    filter: Option<KernelEventKind>,
    handler: Handler,
}

/// Synchronous fan-out event bus.
///
/// Delivery happens on the publishing thread, in emission order: subscribers
/// registered for the exact kind first, then wildcard subscribers, each
/// group in registration order. Handlers may publish or subscribe without
/// deadlocking; the subscriber list is snapshotted before delivery.
pub struct KernelBus {
    subscriptions: RwLock<Vec<Subscription>>,
    next_id: AtomicU64,
}

impl KernelBus {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn subscribe<F>(&self, filter: Option<KernelEventKind>, handler: F) -> SubscriptionId
    where
        F: Fn(&KernelEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let sub = Subscription {
            id,
            filter,
            handler: Arc::new(handler),
        };
        self.subscriptions
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(sub);
        debug!(subscription_id = id.0, ?filter, "Bus subscription registered");
        id
    }

    /// Returns whether a subscription was removed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.write().unwrap_or_else(|e| e.into_inner());
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Deliver `event` to every matching subscriber. Returns the delivery count.
    pub fn publish(&self, event: &KernelEvent) -> usize {
        let kind = event.kind();
        let targets: Vec<Handler> = {
            let subs = self.subscriptions.read().unwrap_or_else(|e| e.into_inner());
            let exact = subs.iter().filter(|s| s.filter == Some(kind));
            let wildcard = subs.iter().filter(|s| s.filter.is_none());
            exact.chain(wildcard).map(|s| s.handler.clone()).collect()
        };
        for handler in &targets {
            handler(event);
        }
        targets.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions
            .read()
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for KernelBus {
    fn default() -> Self {
        Self::new()
    }
}
