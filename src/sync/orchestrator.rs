//! The synchronization orchestrator.
//!
//! Owns the moving parts — durable store, operation queue, conflict registry,
//! event fan-out — and coordinates them around network transitions. All
//! dependencies come in through the constructor; nothing here is global, so
//! two orchestrators over different stores coexist in one process.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::channel::EventChannel;
use crate::config::{OutpostConfig, SyncConfig};
use crate::conflict::{self, Conflict, ConflictPolicy, ConflictRegistry, Resolution, ResolutionAction};
use crate::error::{OutpostError, Result};
use crate::model::{CachedRecord, NewPendingOperation, OpKind, Payload, SyncEvent, SyncStatus};
use crate::queue::{OperationQueue, SyncRunReport};
use crate::remote::RemoteStore;
use crate::retry::RetryPolicy;
use crate::store::DurableStore;
use crate::sync::emitter::{EventEmitter, Subscription};

/// Point-in-time view of the sync layer, for status surfaces.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSnapshot {
    pub connected: bool,
    pub pending_count: u64,
    pub active_conflicts: Vec<Conflict>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync_attempt: Option<DateTime<Utc>>,
}

pub struct SyncOrchestrator {
    store: Arc<dyn DurableStore>,
    remote: Arc<dyn RemoteStore>,
    queue: OperationQueue,
    emitter: EventEmitter,
    conflicts: ConflictRegistry,
    sync_config: SyncConfig,
    quota_warn_ratio: f64,
    /// Identity stamped on outbound events; inbound events carrying it are
    /// echoes of our own writes.
    origin: String,
    online_tx: watch::Sender<bool>,
    last_sync_attempt: Mutex<Option<DateTime<Utc>>>,
    outbound: Mutex<Option<mpsc::Sender<SyncEvent>>>,
}

impl SyncOrchestrator {
    /// Wire an orchestrator over the given store and remote. Starts offline;
    /// callers report connectivity via [`set_online`] / [`set_offline`].
    ///
    /// [`set_online`]: Self::set_online
    /// [`set_offline`]: Self::set_offline
    pub fn new(
        store: Arc<dyn DurableStore>,
        remote: Arc<dyn RemoteStore>,
        config: &OutpostConfig,
    ) -> Self {
        let queue = OperationQueue::new(
            Arc::clone(&store),
            RetryPolicy::from(&config.retry),
            config.store.retention,
            config.sync.purge_after_drain,
        );
        let (online_tx, _) = watch::channel(false);
        Self {
            store,
            remote,
            queue,
            emitter: EventEmitter::new(),
            conflicts: ConflictRegistry::new(),
            sync_config: config.sync.clone(),
            quota_warn_ratio: config.store.quota_warn_ratio,
            origin: config.remote.client_identity(),
            online_tx,
            last_sync_attempt: Mutex::new(None),
            outbound: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn DurableStore> {
        &self.store
    }

    #[must_use]
    pub const fn queue(&self) -> &OperationQueue {
        &self.queue
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.online_tx.borrow()
    }

    /// Watch connectivity transitions; receivers see the current value first.
    #[must_use]
    pub fn network_watch(&self) -> watch::Receiver<bool> {
        self.online_tx.subscribe()
    }

    /// Report connectivity regained. On a genuine offline→online transition
    /// with auto-drain enabled, drains the queue and returns the report.
    pub async fn set_online(&self) -> Result<Option<SyncRunReport>> {
        let was_online = self.online_tx.send_replace(true);
        if was_online {
            return Ok(None);
        }
        info!("Network transition: offline -> online");
        if !self.sync_config.auto_drain {
            return Ok(None);
        }
        match self.drain().await {
            Ok(report) => Ok(Some(report)),
            // Someone else is already pushing; their drain covers us.
            Err(OutpostError::DrainInProgress) => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Report connectivity lost. A running drain winds down after its
    /// in-flight attempt; everything else stays `pending`.
    pub fn set_offline(&self) {
        let was_online = self.online_tx.send_replace(false);
        if was_online {
            info!("Network transition: online -> offline");
            self.queue.request_stop();
        }
    }

    /// Subscribe to events for one table.
    pub fn subscribe(
        &self,
        table: impl Into<String>,
        callback: impl Fn(&SyncEvent) + Send + Sync + 'static,
    ) -> Subscription {
        self.emitter.subscribe(table, callback)
    }

    /// Record a local mutation without attempting a push.
    ///
    /// For updates and deletes the cached record's version is captured as the
    /// operation's base, so the service can detect concurrent writes.
    pub fn enqueue(
        &self,
        table: &str,
        kind: OpKind,
        record_id: Option<&str>,
        payload: Payload,
    ) -> Result<i64> {
        let op = match kind {
            OpKind::Create => NewPendingOperation::create(table, payload),
            OpKind::Update => {
                let id = record_id.ok_or_else(|| {
                    OutpostError::Config("update requires a record id".to_string())
                })?;
                let base = self.cached_version(table, id)?;
                NewPendingOperation::update(table, id, payload, base)
            }
            OpKind::Delete => {
                let id = record_id.ok_or_else(|| {
                    OutpostError::Config("delete requires a record id".to_string())
                })?;
                let base = self.cached_version(table, id)?;
                NewPendingOperation::delete(table, id, base)
            }
        };
        self.queue.enqueue(op)
    }

    /// Record a local mutation and, when online, push immediately.
    ///
    /// The push is best-effort: the operation is durable either way, and a
    /// drain already in flight will be followed by another one later.
    pub async fn submit(
        &self,
        table: &str,
        kind: OpKind,
        record_id: Option<&str>,
        payload: Payload,
    ) -> Result<i64> {
        let local_id = self.enqueue(table, kind, record_id, payload)?;
        if self.is_online() && self.sync_config.push_on_enqueue {
            match self.drain().await {
                Ok(_) | Err(OutpostError::DrainInProgress) => {}
                Err(err) => {
                    warn!(local_id, error = %err, "Immediate push failed; operation stays queued");
                }
            }
        }
        Ok(local_id)
    }

    /// Push all pending operations now.
    ///
    /// Conflicts found by the push land in the registry; confirmed mutations
    /// are broadcast to subscribers and forwarded to the event channel.
    pub async fn drain(&self) -> Result<SyncRunReport> {
        *self.last_sync_attempt.lock() = Some(Utc::now());
        let report = self.queue.drain(self.remote.as_ref()).await?;

        for conflict in &report.conflicts {
            self.conflicts.upsert(conflict.clone());
        }
        for event in &report.confirmed {
            let event = event.clone().with_origin(self.origin.clone());
            self.emitter.broadcast(&event);
            self.forward_outbound(event);
        }
        self.check_storage();
        Ok(report)
    }

    /// Apply an inbound remote event.
    ///
    /// Echoes of our own writes are ignored. An event colliding with a still
    /// unsettled local operation becomes a conflict and is *not* applied; the
    /// cache keeps the local view until someone resolves it.
    pub fn handle_remote_event(&self, event: &SyncEvent) -> Result<()> {
        if event.origin_user_id.as_deref() == Some(self.origin.as_str()) {
            debug!(
                table = %event.table,
                record_id = %event.record_id,
                "Ignoring echo of our own mutation"
            );
            return Ok(());
        }

        if let Some(op) = self.blocking_operation(event)? {
            if let Some(conflict) = conflict::detect(&op, event) {
                info!(
                    table = %event.table,
                    record_id = %event.record_id,
                    local_op_id = op.local_id,
                    "Remote event conflicts with a pending local write"
                );
                self.conflicts.upsert(conflict);
                return Ok(());
            }
        }

        self.apply_event(event)?;
        self.emitter.broadcast(event);
        Ok(())
    }

    /// Resolve a registered conflict with the given policy.
    pub fn resolve_conflict(
        &self,
        conflict_id: &str,
        policy: ConflictPolicy,
    ) -> Result<Resolution> {
        let conflict = self
            .conflicts
            .take(conflict_id)
            .ok_or_else(|| OutpostError::NotFound(format!("conflict {conflict_id}")))?;
        let resolution = conflict::resolve(&conflict, policy, self.sync_config.tie_break);
        if let Err(err) = self.apply_resolution(&conflict, &resolution) {
            // Leave the conflict visible; resolution can be retried.
            self.conflicts.upsert(conflict);
            return Err(err);
        }
        Ok(resolution)
    }

    /// Drop a conflict without touching stored data.
    pub fn dismiss_conflict(&self, conflict_id: &str) -> bool {
        self.conflicts.dismiss(conflict_id)
    }

    #[must_use]
    pub fn active_conflicts(&self) -> Vec<Conflict> {
        self.conflicts.active()
    }

    /// Apply `patch` to the cached record immediately, then enqueue and (when
    /// online) push the update. If the push fails terminally the cache is
    /// restored and `rollback` is invoked with the pre-patch record.
    ///
    /// A conflict outcome does not roll back: the tentative value stays until
    /// the conflict is resolved.
    pub async fn optimistic_update<F>(
        &self,
        table: &str,
        record_id: &str,
        patch: Payload,
        rollback: F,
    ) -> Result<i64>
    where
        F: FnOnce(Option<CachedRecord>) + Send,
    {
        let previous = self.store.get_cached(table, record_id)?;

        let tentative = match &previous {
            Some(cached) => {
                let mut merged = cached.payload.clone();
                for (key, value) in &patch {
                    merged.insert(key.clone(), value.clone());
                }
                CachedRecord::new(record_id, cached.version, merged)
            }
            None => CachedRecord::new(record_id, 0, patch.clone()),
        };
        self.store.cache_records(table, &[tentative])?;

        let local_id = self.enqueue(table, OpKind::Update, Some(record_id), patch)?;
        if !self.is_online() || !self.sync_config.push_on_enqueue {
            return Ok(local_id);
        }

        let report = match self.drain().await {
            Ok(report) => report,
            Err(OutpostError::DrainInProgress) => return Ok(local_id),
            Err(err) => {
                warn!(local_id, error = %err, "Optimistic push failed; operation stays queued");
                return Ok(local_id);
            }
        };

        if report.failed.contains(&local_id) {
            warn!(local_id, table, record_id, "Optimistic update failed; rolling back");
            match &previous {
                Some(cached) => self.store.cache_records(table, &[cached.clone()])?,
                None => self.store.remove_cached(table, record_id)?,
            }
            rollback(previous);
        }
        Ok(local_id)
    }

    /// Current status: connectivity, queue depth, conflicts, last attempt.
    pub fn snapshot(&self) -> Result<SyncSnapshot> {
        Ok(SyncSnapshot {
            connected: self.is_online(),
            pending_count: self.store.count_by_status(SyncStatus::Pending)?,
            active_conflicts: self.conflicts.active(),
            last_sync_attempt: *self.last_sync_attempt.lock(),
        })
    }

    /// Drive the orchestrator from an event channel until it closes.
    ///
    /// Marks the client online on entry and offline on exit. Inbound events
    /// go through [`handle_remote_event`]; mutations confirmed by drains are
    /// forwarded out so collaborators hear about them.
    ///
    /// [`handle_remote_event`]: Self::handle_remote_event
    pub async fn run<C: EventChannel>(&self, mut channel: C) -> Result<()> {
        let (tx, mut rx) = mpsc::channel::<SyncEvent>(64);
        *self.outbound.lock() = Some(tx);

        if let Err(err) = self.set_online().await {
            warn!(error = %err, "Initial drain failed; continuing with live events");
        }

        let result = loop {
            tokio::select! {
                inbound = channel.next_event() => match inbound {
                    Ok(Some(event)) => {
                        if let Err(err) = self.handle_remote_event(&event) {
                            warn!(error = %err, "Failed to apply channel event");
                        }
                    }
                    Ok(None) => break Ok(()),
                    Err(err) => break Err(err),
                },
                outbound = rx.recv() => {
                    if let Some(event) = outbound {
                        if let Err(err) = channel.send(&event).await {
                            warn!(error = %err, "Failed to forward confirmed mutation");
                        }
                    }
                }
            }
        };

        *self.outbound.lock() = None;
        self.set_offline();
        let _ = channel.close().await;
        result
    }

    fn cached_version(&self, table: &str, record_id: &str) -> Result<Option<i64>> {
        Ok(self
            .store
            .get_cached(table, record_id)?
            .map(|cached| cached.version))
    }

    /// Oldest unsettled local operation touching the event's record.
    fn blocking_operation(
        &self,
        event: &SyncEvent,
    ) -> Result<Option<crate::model::PendingOperation>> {
        let filter = crate::model::OperationFilter::by_table(&event.table);
        let ops = self.store.list_operations(&filter)?;
        Ok(ops.into_iter().find(|op| {
            matches!(op.sync_status, SyncStatus::Pending | SyncStatus::Syncing)
                && op.record_id.as_deref() == Some(event.record_id.as_str())
        }))
    }

    fn apply_event(&self, event: &SyncEvent) -> Result<()> {
        match event.operation {
            OpKind::Delete => {
                self.store.remove_cached(&event.table, &event.record_id)?;
                debug!(
                    table = %event.table,
                    record_id = %event.record_id,
                    "Remote delete applied to cache"
                );
            }
            OpKind::Create | OpKind::Update => {
                let existing = self.store.get_cached(&event.table, &event.record_id)?;
                // Events may carry partial payloads; fold them over the
                // cached fields.
                let mut payload = existing
                    .as_ref()
                    .map(|cached| cached.payload.clone())
                    .unwrap_or_default();
                for (key, value) in &event.payload {
                    payload.insert(key.clone(), value.clone());
                }
                let version = event.version.unwrap_or_else(|| {
                    existing.as_ref().map_or(1, |cached| cached.version + 1)
                });
                let mut record = CachedRecord::new(&event.record_id, version, payload);
                record.last_modified = event.timestamp;
                self.store.cache_records(&event.table, &[record])?;
                debug!(
                    table = %event.table,
                    record_id = %event.record_id,
                    version,
                    "Remote change applied to cache"
                );
            }
        }
        Ok(())
    }

    fn apply_resolution(&self, conflict: &Conflict, resolution: &Resolution) -> Result<()> {
        match resolution.action {
            ResolutionAction::RetryLocal => {
                // Keep the local payload; rebase onto the remote version so
                // the next push is current.
                self.store.replace_payload(
                    conflict.local_op_id,
                    &resolution.payload,
                    resolution.version,
                )?;
            }
            ResolutionAction::DiscardLocal => {
                match self.store.remove_operation(conflict.local_op_id) {
                    Ok(()) => {}
                    // Already gone (e.g. discarded by hand); nothing to undo.
                    Err(OutpostError::NotFound(_)) => {}
                    Err(err) => return Err(err),
                }
            }
            ResolutionAction::ReplaceLocal => {
                self.store.replace_payload(
                    conflict.local_op_id,
                    &resolution.payload,
                    resolution.version,
                )?;
            }
        }

        if conflict.remote_deleted && resolution.action == ResolutionAction::DiscardLocal {
            self.store
                .remove_cached(&conflict.table, &conflict.record_id)?;
            return Ok(());
        }

        let version = resolution.version.unwrap_or_else(|| {
            self.store
                .get_cached(&conflict.table, &conflict.record_id)
                .ok()
                .flatten()
                .map_or(1, |cached| cached.version + 1)
        });
        let record = CachedRecord::new(&conflict.record_id, version, resolution.payload.clone());
        self.store.cache_records(&conflict.table, &[record])?;
        Ok(())
    }

    fn forward_outbound(&self, event: SyncEvent) {
        let guard = self.outbound.lock();
        if let Some(tx) = guard.as_ref() {
            if let Err(err) = tx.try_send(event) {
                debug!(error = %err, "Outbound buffer full; event not forwarded");
            }
        }
    }

    fn check_storage(&self) {
        let Ok(info) = self.store.storage_info() else {
            return;
        };
        if let Some(ratio) = info.usage_ratio() {
            if ratio >= self.quota_warn_ratio {
                warn!(
                    used_bytes = info.used_bytes,
                    quota_bytes = info.quota_bytes,
                    ratio = format!("{ratio:.2}"),
                    "Local storage approaching quota"
                );
            }
        }
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("origin", &self.origin)
            .field("online", &self.is_online())
            .finish_non_exhaustive()
    }
}
