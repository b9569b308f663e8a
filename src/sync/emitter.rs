//! Table-keyed pub/sub for sync events.
//!
//! Subscribers register per table and receive every event the orchestrator
//! applies or confirms for it. Snapshot-on-broadcast semantics: a subscriber
//! removed during a broadcast still sees that round, one added mid-round
//! waits for the next. The registry lock is never held while callbacks run,
//! so callbacks may freely subscribe and unsubscribe.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tracing::warn;

use crate::model::SyncEvent;

/// Closure type for event subscribers.
pub type SubscriberFn = dyn Fn(&SyncEvent) + Send + Sync;

#[derive(Default)]
struct Registry {
    subscribers: Mutex<HashMap<String, Vec<(u64, Arc<SubscriberFn>)>>>,
    next_id: AtomicU64,
}

/// Per-table event fan-out. Clones share the same registry.
#[derive(Clone, Default)]
pub struct EventEmitter {
    registry: Arc<Registry>,
}

impl EventEmitter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for events on `table`. Deregistration is explicit
    /// via [`Subscription::unsubscribe`]; a dropped handle leaves the
    /// subscriber active.
    pub fn subscribe(
        &self,
        table: impl Into<String>,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let table = table.into();
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.registry
            .subscribers
            .lock()
            .entry(table.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        Subscription {
            registry: Arc::downgrade(&self.registry),
            table,
            id,
        }
    }

    /// Deliver `event` to every subscriber of its table, in registration
    /// order. A panicking subscriber is logged and skipped; it never poisons
    /// the others or the caller.
    pub fn broadcast(&self, event: &SyncEvent) {
        let snapshot: Vec<(u64, Arc<SubscriberFn>)> = {
            let guard = self.registry.subscribers.lock();
            match guard.get(&event.table) {
                Some(entries) => entries
                    .iter()
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect(),
                None => return,
            }
        };
        // Lock released; callbacks may subscribe/unsubscribe freely.
        for (id, callback) in snapshot {
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                warn!(
                    table = %event.table,
                    subscriber = id,
                    "Subscriber panicked; continuing with the rest"
                );
            }
        }
    }

    /// Number of subscribers currently registered for `table`.
    #[must_use]
    pub fn subscriber_count(&self, table: &str) -> usize {
        self.registry
            .subscribers
            .lock()
            .get(table)
            .map_or(0, Vec::len)
    }
}

/// Handle for one subscriber registration.
///
/// Unsubscribing is explicit and idempotent; dropping the handle without
/// calling it leaves the subscriber active for the emitter's lifetime.
pub struct Subscription {
    registry: std::sync::Weak<Registry>,
    table: String,
    id: u64,
}

impl Subscription {
    /// Remove the subscriber. Safe to call more than once.
    pub fn unsubscribe(&self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let mut guard = registry.subscribers.lock();
        if let Some(entries) = guard.get_mut(&self.table) {
            entries.retain(|(id, _)| *id != self.id);
            if entries.is_empty() {
                guard.remove(&self.table);
            }
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("table", &self.table)
            .field("id", &self.id)
            .finish()
    }
}
