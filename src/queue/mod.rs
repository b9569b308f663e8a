//! The operation queue: ordered, at-least-once submission of local mutations
//! to the remote store.
//!
//! `drain` walks pending entries in append order and pushes each one through
//! the retry executor. Per `(table, record_id)` the walk is strictly FIFO: a
//! later operation on a record is never issued while an earlier one is still
//! unsettled. Only one drain runs at a time; a second caller gets
//! [`OutpostError::DrainInProgress`] instead of interleaved pushes.

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::conflict::{self, Conflict};
use crate::error::{ErrorClass, OutpostError, RemoteFailure, Result};
use crate::model::{NewPendingOperation, OpKind, PendingOperation, SyncEvent, SyncStatus};
use crate::remote::{RemoteRecord, RemoteStore};
use crate::retry::{ExecutionOutcome, RetryExecutor, RetryPolicy};
use crate::store::DurableStore;

/// What one drain accomplished.
#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRunReport {
    /// Local ids confirmed by the remote store.
    pub successful: Vec<i64>,
    /// Local ids that reached the `error` state.
    pub failed: Vec<i64>,
    /// Conflicts detected during this drain; they stay unresolved.
    pub conflicts: Vec<Conflict>,
    /// Human-readable descriptions of everything that went wrong.
    pub errors: Vec<String>,
    /// Confirmed mutations in final form, for subscribers and the channel.
    pub confirmed: Vec<SyncEvent>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
}

impl SyncRunReport {
    #[must_use]
    pub fn summary_line(&self) -> String {
        format!(
            "↑{} ✗{} ⚠{} ({}ms)",
            self.successful.len(),
            self.failed.len(),
            self.conflicts.len(),
            self.elapsed.as_millis()
        )
    }

    /// True when nothing failed, conflicted, or was left behind.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.conflicts.is_empty() && self.errors.is_empty()
    }
}

/// How one pushed operation settled.
enum PushResult {
    Confirmed(Option<RemoteRecord>),
    /// Left `pending` for a later drain; the record key is blocked for the
    /// rest of this one.
    Deferred,
    Failed(String),
    Conflicted(Conflict),
}

pub struct OperationQueue {
    store: Arc<dyn DurableStore>,
    executor: RetryExecutor,
    retention: Duration,
    purge_after_drain: bool,
    drain_lock: AsyncMutex<()>,
    stop_requested: AtomicBool,
}

impl OperationQueue {
    pub fn new(
        store: Arc<dyn DurableStore>,
        policy: RetryPolicy,
        retention: Duration,
        purge_after_drain: bool,
    ) -> Self {
        let executor = RetryExecutor::new(Arc::clone(&store), policy);
        Self {
            store,
            executor,
            retention,
            purge_after_drain,
            drain_lock: AsyncMutex::new(()),
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Record a local mutation for later submission. Durable before return;
    /// this is the only await-free entry point and it works offline.
    pub fn enqueue(&self, op: NewPendingOperation) -> Result<i64> {
        let table = op.table.clone();
        let kind = op.kind;
        let local_id = self.store.append(op)?;
        debug!(local_id, table = %table, kind = %kind, "Operation enqueued");
        Ok(local_id)
    }

    /// Operations still waiting for submission.
    pub fn pending_count(&self) -> Result<u64> {
        self.store.count_by_status(SyncStatus::Pending)
    }

    /// Ask a running drain to wind down after its current operation.
    /// In-flight attempts finish; remaining entries stay `pending`.
    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    /// Push every pending operation, oldest first.
    ///
    /// Returns [`OutpostError::DrainInProgress`] when another drain holds the
    /// lock. Store-level failures on an individual operation are reported in
    /// the run report and do not abort the rest of the drain.
    pub async fn drain(&self, remote: &dyn RemoteStore) -> Result<SyncRunReport> {
        let Ok(_guard) = self.drain_lock.try_lock() else {
            return Err(OutpostError::DrainInProgress);
        };
        self.stop_requested.store(false, Ordering::SeqCst);

        let timer = Instant::now();
        let mut report = SyncRunReport {
            started_at: Some(Utc::now()),
            ..SyncRunReport::default()
        };

        let pending = self.store.list_pending(None)?;
        if pending.is_empty() {
            report.elapsed = timer.elapsed();
            return Ok(report);
        }
        info!(
            pending = pending.len(),
            tables = %touched_tables(&pending),
            "Draining operation queue"
        );

        let mut blocked: HashSet<(String, String)> = HashSet::new();
        for op in pending {
            if self.stop_requested.load(Ordering::SeqCst) {
                debug!(
                    local_id = op.local_id,
                    "Stop requested; leaving remaining operations pending"
                );
                break;
            }
            let key = op.record_key();
            if blocked.contains(&key) {
                debug!(
                    local_id = op.local_id,
                    table = %key.0,
                    record_id = %key.1,
                    "Earlier operation on this record is unsettled; holding"
                );
                continue;
            }

            match self.push_one(remote, &op).await {
                Ok(PushResult::Confirmed(record)) => {
                    report.successful.push(op.local_id);
                    report.confirmed.push(confirmation_event(&op, record.as_ref()));
                }
                Ok(PushResult::Deferred) => {
                    blocked.insert(key);
                }
                Ok(PushResult::Failed(message)) => {
                    report.failed.push(op.local_id);
                    report.errors.push(format!("op {}: {message}", op.local_id));
                    // `error` is terminal; later operations on the record may
                    // proceed.
                }
                Ok(PushResult::Conflicted(conflict)) => {
                    report.conflicts.push(conflict);
                    blocked.insert(key);
                }
                Err(err) => {
                    // Storage trouble is fatal for this operation only.
                    warn!(local_id = op.local_id, error = %err, "Skipping operation after store failure");
                    report.errors.push(format!("op {}: {err}", op.local_id));
                    blocked.insert(key);
                }
            }
        }

        if self.purge_after_drain {
            match self.store.purge_synced(self.retention) {
                Ok(0) => {}
                Ok(purged) => debug!(purged, "Reclaimed synced operations past retention"),
                Err(err) => warn!(error = %err, "Retention purge failed"),
            }
        }

        report.elapsed = timer.elapsed();
        info!(
            successful = report.successful.len(),
            failed = report.failed.len(),
            conflicts = report.conflicts.len(),
            summary = %report.summary_line(),
            "Drain complete"
        );
        Ok(report)
    }

    /// Re-submit an `error` operation: back to `pending` for the next drain.
    pub fn retry_operation(&self, local_id: i64) -> Result<()> {
        self.store
            .update_status(local_id, SyncStatus::Pending, None)?;
        info!(local_id, "Operation re-submitted");
        Ok(())
    }

    /// Drop an `error` operation without submitting it.
    pub fn discard_operation(&self, local_id: i64) -> Result<()> {
        let op = self
            .store
            .get_operation(local_id)?
            .ok_or_else(|| OutpostError::NotFound(format!("operation {local_id}")))?;
        if op.sync_status != SyncStatus::Error {
            return Err(OutpostError::InvalidTransition {
                local_id,
                from: op.sync_status.as_str().to_string(),
                to: "discarded".to_string(),
            });
        }
        self.store.remove_operation(local_id)?;
        info!(local_id, table = %op.table, "Operation discarded");
        Ok(())
    }

    /// Reclaim synced history older than the retention window.
    pub fn purge_synced(&self) -> Result<u64> {
        self.store.purge_synced(self.retention)
    }

    async fn push_one(&self, remote: &dyn RemoteStore, op: &PendingOperation) -> Result<PushResult> {
        self.store
            .update_status(op.local_id, SyncStatus::Syncing, None)?;

        let report = self
            .executor
            .execute(op, |_attempt| async move {
                match op.kind {
                    OpKind::Create => remote
                        .create(&op.table, &op.payload, &op.idempotency_key)
                        .await
                        .map(Some),
                    OpKind::Update => {
                        let id = required_record_id(op)?;
                        remote
                            .update(&op.table, id, &op.payload, op.base_version)
                            .await
                            .map(Some)
                    }
                    OpKind::Delete => {
                        let id = required_record_id(op)?;
                        remote.delete(&op.table, id).await.map(|()| None)
                    }
                }
            })
            .await?;

        let timed_out = report.timed_out();
        let attempts = report.attempts;
        match report.outcome {
            ExecutionOutcome::Success(record) => {
                self.store
                    .update_status(op.local_id, SyncStatus::Synced, None)?;
                match (&record, op.kind) {
                    (Some(remote_record), _) => {
                        self.store
                            .cache_records(&op.table, &[remote_record.to_cached()])?;
                    }
                    (None, OpKind::Delete) => {
                        if let Some(id) = &op.record_id {
                            self.store.remove_cached(&op.table, id)?;
                        }
                    }
                    (None, _) => {}
                }
                Ok(PushResult::Confirmed(record))
            }
            ExecutionOutcome::Failed { class, .. } if timed_out => {
                // Cancelled, not failed: back to pending for the next drain.
                self.store
                    .update_status(op.local_id, SyncStatus::Pending, None)?;
                debug!(
                    local_id = op.local_id,
                    attempts,
                    class = %class,
                    "Attempts timed out; operation reverted to pending"
                );
                Ok(PushResult::Deferred)
            }
            ExecutionOutcome::Failed { class, message } => {
                self.store
                    .update_status(op.local_id, SyncStatus::Error, Some(&message))?;
                warn!(
                    local_id = op.local_id,
                    attempts,
                    class = %class,
                    "Operation failed terminally"
                );
                Ok(PushResult::Failed(message))
            }
            ExecutionOutcome::Conflict(failure) => self.settle_conflict(remote, op, failure).await,
        }
    }

    /// The service rejected the push as a conflicting write. Fetch the
    /// current remote state, build the conflict, and put the operation back
    /// to `pending` until someone resolves it.
    async fn settle_conflict(
        &self,
        remote: &dyn RemoteStore,
        op: &PendingOperation,
        failure: RemoteFailure,
    ) -> Result<PushResult> {
        let record_id = match &op.record_id {
            Some(id) => id.clone(),
            // A conflicting create has no remote identity to compare against.
            None => {
                self.store
                    .update_status(op.local_id, SyncStatus::Error, Some(&failure.message))?;
                return Ok(PushResult::Failed(failure.message));
            }
        };

        let event = match remote.get(&op.table, &record_id).await {
            Ok(record) => {
                let mut event =
                    SyncEvent::new(&op.table, OpKind::Update, &record_id, record.payload.clone());
                event.version = Some(record.version);
                if let Some(at) = record.last_modified {
                    event.timestamp = at;
                }
                event
            }
            Err(err) if err.class() == ErrorClass::NotFound => {
                // The record is gone remotely; the conflict is write-vs-delete.
                SyncEvent::new(&op.table, OpKind::Delete, &record_id, Default::default())
            }
            Err(err) => {
                warn!(
                    local_id = op.local_id,
                    error = %err,
                    "Conflicting write, but remote state is unreachable; retrying next drain"
                );
                self.store
                    .update_status(op.local_id, SyncStatus::Pending, None)?;
                return Ok(PushResult::Deferred);
            }
        };

        self.store
            .update_status(op.local_id, SyncStatus::Pending, None)?;

        match conflict::detect(op, &event) {
            Some(conflict) => Ok(PushResult::Conflicted(conflict)),
            None => {
                // The service said conflict but the values agree (or the echo
                // was stale). Adopt the remote version so the next push
                // carries a current base.
                if let Some(version) = event.version {
                    self.store
                        .replace_payload(op.local_id, &op.payload, Some(version))?;
                    debug!(
                        local_id = op.local_id,
                        version, "Rebased operation onto remote version"
                    );
                }
                Ok(PushResult::Deferred)
            }
        }
    }
}

impl std::fmt::Debug for OperationQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationQueue")
            .field("retention", &self.retention)
            .field("purge_after_drain", &self.purge_after_drain)
            .finish_non_exhaustive()
    }
}

fn required_record_id(op: &PendingOperation) -> Result<&str> {
    op.record_id.as_deref().ok_or_else(|| {
        OutpostError::NotFound(format!(
            "operation {} has no record id for {}",
            op.local_id, op.kind
        ))
    })
}

/// Wire event announcing a confirmed mutation.
fn confirmation_event(op: &PendingOperation, record: Option<&RemoteRecord>) -> SyncEvent {
    match record {
        Some(record) => {
            let mut event = SyncEvent::new(&op.table, op.kind, &record.id, record.payload.clone());
            event.version = Some(record.version);
            event
        }
        None => SyncEvent::new(
            &op.table,
            op.kind,
            op.record_id.as_deref().unwrap_or_default(),
            Default::default(),
        ),
    }
}

/// Render the distinct tables touched by a batch, for log lines.
#[must_use]
pub fn touched_tables(ops: &[PendingOperation]) -> String {
    ops.iter().map(|op| op.table.as_str()).unique().join(", ")
}
