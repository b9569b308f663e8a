//! Durable storage for pending operations and cached records.
//!
//! The store is the single shared mutable resource of the data layer. All
//! implementations are crash-safe to the extent their backing medium allows
//! and enforce the operation lifecycle: a pending operation is never silently
//! dropped, and a cached record's version never goes backwards.

pub mod memory;
pub mod migrations;
pub mod sqlite;

use std::time::Duration;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::model::{
    CachedRecord, NewPendingOperation, OperationFilter, Payload, PendingOperation, StorageInfo,
    SyncStatus,
};

/// Crash-safe persistence contract for the operation log and record cache.
///
/// Methods are synchronous: the backing I/O is local and fast relative to
/// remote calls, and the coordinator invokes them between suspension points.
/// Status changes go through [`update_status`](Self::update_status), which
/// rejects transitions outside the lifecycle
/// (`pending → syncing → {synced | error | pending}`, `error → pending`).
pub trait DurableStore: Send + Sync {
    /// Append a new operation to the log; returns the assigned `local_id`.
    ///
    /// Fails only when the backing store is unavailable. No payload
    /// validation happens here: enqueueing while offline must always succeed.
    fn append(&self, op: NewPendingOperation) -> Result<i64>;

    /// All `pending` operations, FIFO by `created_at` with `local_id` as the
    /// tiebreak, optionally restricted to one table.
    fn list_pending(&self, table: Option<&str>) -> Result<Vec<PendingOperation>>;

    /// Fetch one operation by id.
    fn get_operation(&self, local_id: i64) -> Result<Option<PendingOperation>>;

    /// Inspect the log, filtered by table and/or status, FIFO ordered.
    fn list_operations(&self, filter: &OperationFilter) -> Result<Vec<PendingOperation>>;

    /// Transition an operation to `status`. A message, when given, lands in
    /// `last_error`; otherwise the field is left to
    /// [`record_attempt`](Self::record_attempt). `NotFound` for unknown ids,
    /// `InvalidTransition` for moves outside the lifecycle.
    fn update_status(&self, local_id: i64, status: SyncStatus, error: Option<&str>) -> Result<()>;

    /// Record one delivery attempt: increments `attempts` and overwrites
    /// `last_error` with the classified failure message. A successful attempt
    /// passes `None` and clears it.
    fn record_attempt(&self, local_id: i64, error: Option<&str>) -> Result<()>;

    /// Replace an operation's payload and base version; used when a merge
    /// resolution re-pends the operation with the merged value.
    fn replace_payload(
        &self,
        local_id: i64,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<()>;

    /// Remove one operation outright (discarding a terminal entry, or
    /// dropping the local side of an accept-remote resolution).
    fn remove_operation(&self, local_id: i64) -> Result<()>;

    /// Upsert snapshots by `(table, record_id)`. Rows carrying an older
    /// version than the cached one are skipped, never silently overwritten.
    fn cache_records(&self, table: &str, records: &[CachedRecord]) -> Result<()>;

    /// Fetch one cached record.
    fn get_cached(&self, table: &str, record_id: &str) -> Result<Option<CachedRecord>>;

    /// All cached records for a table, ordered by record id.
    fn list_cached(&self, table: &str) -> Result<Vec<CachedRecord>>;

    /// Drop one cached record, after a confirmed delete or an accept-remote
    /// resolution of a remote deletion. Removing a missing row is a no-op.
    fn remove_cached(&self, table: &str, record_id: &str) -> Result<()>;

    /// Usage and quota. Implementations without a quota probe report zeroes.
    fn storage_info(&self) -> Result<StorageInfo>;

    /// Reclaim `synced` operations whose completion is older than
    /// `older_than`; returns the purge count. `pending`, `syncing`, and
    /// `error` entries are never touched.
    fn purge_synced(&self, older_than: Duration) -> Result<u64>;

    /// Count operations currently in `status`.
    fn count_by_status(&self, status: SyncStatus) -> Result<u64>;
}

/// Shared transition check for store implementations.
pub(crate) fn check_transition(
    local_id: i64,
    from: SyncStatus,
    to: SyncStatus,
) -> Result<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(crate::error::OutpostError::InvalidTransition {
            local_id,
            from: from.as_str().to_string(),
            to: to.as_str().to_string(),
        })
    }
}
