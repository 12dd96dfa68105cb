// src/bus.rs
// In-process typed publish/subscribe for lifecycle events

use serde::Serialize;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::warn;

/// Lifecycle events published by the runtime components
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum BusEvent {
    ServerConnected { server: String },
    ServerDisconnected { server: String, error: Option<String> },
    ServerReconnecting { server: String, attempt: u32 },
    ReconnectFailed { server: String, attempts: u32 },
    PlanStarted { plan_id: String, task_count: usize },
    PlanCompleted { plan_id: String, success: bool },
    TaskStarted { plan_id: String, task_id: String },
    TaskCompleted { plan_id: String, task_id: String, duration_ms: u64 },
    TaskFailed { plan_id: String, task_id: String, error: String },
    TaskSkipped { plan_id: String, task_id: String },
    ObjectiveStarted { objective_type: String },
    ObjectiveCompleted { objective_type: String, success: bool },
    MemoryUpdated { session_id: String },
    ToolEnabled { session_id: String, tool: String },
}

/// Discriminant used for subscription routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    ServerConnected,
    ServerDisconnected,
    ServerReconnecting,
    ReconnectFailed,
    PlanStarted,
    PlanCompleted,
    TaskStarted,
    TaskCompleted,
    TaskFailed,
    TaskSkipped,
    ObjectiveStarted,
    ObjectiveCompleted,
    MemoryUpdated,
    ToolEnabled,
}

impl BusEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            BusEvent::ServerConnected { .. } => EventKind::ServerConnected,
            BusEvent::ServerDisconnected { .. } => EventKind::ServerDisconnected,
            BusEvent::ServerReconnecting { .. } => EventKind::ServerReconnecting,
            BusEvent::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            BusEvent::PlanStarted { .. } => EventKind::PlanStarted,
            BusEvent::PlanCompleted { .. } => EventKind::PlanCompleted,
            BusEvent::TaskStarted { .. } => EventKind::TaskStarted,
            BusEvent::TaskCompleted { .. } => EventKind::TaskCompleted,
            BusEvent::TaskFailed { .. } => EventKind::TaskFailed,
            BusEvent::TaskSkipped { .. } => EventKind::TaskSkipped,
            BusEvent::ObjectiveStarted { .. } => EventKind::ObjectiveStarted,
            BusEvent::ObjectiveCompleted { .. } => EventKind::ObjectiveCompleted,
            BusEvent::MemoryUpdated { .. } => EventKind::MemoryUpdated,
            BusEvent::ToolEnabled { .. } => EventKind::ToolEnabled,
        }
    }
}

type Handler = Arc<dyn Fn(&BusEvent) + Send + Sync>;

struct BusInner {
    subscribers: RwLock<HashMap<EventKind, Vec<(u64, Handler)>>>,
    next_id: AtomicU64,
}

/// Cheaply cloneable handle to the process-wide event bus
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

/// Handle returned by `subscribe`; call `unsubscribe` to detach the handler.
/// Dropping the handle without unsubscribing leaves the handler registered.
pub struct Subscription {
    bus: Arc<BusInner>,
    kind: EventKind,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        let mut subscribers = self.bus.subscribers.write().unwrap();
        if let Some(handlers) = subscribers.get_mut(&self.kind) {
            handlers.retain(|(id, _)| *id != self.id);
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for one event kind. Handlers run synchronously in
    /// registration order from the publishing thread.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&BusEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subscribers = self.inner.subscribers.write().unwrap();
        subscribers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            bus: self.inner.clone(),
            kind,
            id,
        }
    }

    /// Publish an event to all subscribers of its kind. A panicking handler
    /// is logged and swallowed; it never breaks the publisher or the
    /// handlers registered after it.
    pub fn publish(&self, event: BusEvent) {
        let handlers: Vec<Handler> = {
            let subscribers = self.inner.subscribers.read().unwrap();
            subscribers
                .get(&event.kind())
                .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };

        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(&event))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!("[Bus] Subscriber panicked handling {:?}: {}", event.kind(), message);
            }
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.inner
            .subscribers
            .read()
            .unwrap()
            .get(&kind)
            .map(|list| list.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
