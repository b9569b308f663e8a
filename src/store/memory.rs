//! In-memory durable store.
//!
//! Mirrors the SQLite implementation's semantics without touching disk.
//! Backs tests and hosts that have no persistent storage to offer; data
//! lives only as long as the process.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use crate::error::{OutpostError, Result};
use crate::model::{
    CachedRecord, NewPendingOperation, OperationFilter, Payload, PendingOperation, StorageInfo,
    SyncStatus,
};
use crate::store::{DurableStore, check_transition};

#[derive(Debug, Default)]
pub struct MemoryStore {
    ops: RwLock<BTreeMap<i64, PendingOperation>>,
    completed: RwLock<HashMap<i64, DateTime<Utc>>>,
    cache: RwLock<HashMap<String, BTreeMap<String, CachedRecord>>>,
    next_id: AtomicI64,
    quota_bytes: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that reports the given soft quota from `storage_info`.
    pub fn with_quota(quota_bytes: u64) -> Self {
        Self {
            quota_bytes,
            ..Self::default()
        }
    }

    fn ordered(&self, mut keep: impl FnMut(&PendingOperation) -> bool) -> Vec<PendingOperation> {
        let ops = self.ops.read();
        let mut out: Vec<PendingOperation> = ops.values().filter(|op| keep(op)).cloned().collect();
        out.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.local_id.cmp(&b.local_id))
        });
        out
    }
}

impl DurableStore for MemoryStore {
    fn append(&self, op: NewPendingOperation) -> Result<i64> {
        let local_id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let stored = PendingOperation {
            local_id,
            table: op.table,
            kind: op.kind,
            record_id: op.record_id,
            payload: op.payload,
            created_at: Utc::now(),
            sync_status: SyncStatus::Pending,
            attempts: 0,
            last_error: None,
            idempotency_key: Uuid::new_v4().to_string(),
            base_version: op.base_version,
        };
        self.ops.write().insert(local_id, stored);
        Ok(local_id)
    }

    fn list_pending(&self, table: Option<&str>) -> Result<Vec<PendingOperation>> {
        Ok(self.ordered(|op| {
            op.sync_status == SyncStatus::Pending
                && table.is_none_or(|wanted| op.table == wanted)
        }))
    }

    fn get_operation(&self, local_id: i64) -> Result<Option<PendingOperation>> {
        Ok(self.ops.read().get(&local_id).cloned())
    }

    fn list_operations(&self, filter: &OperationFilter) -> Result<Vec<PendingOperation>> {
        Ok(self.ordered(|op| {
            filter
                .table
                .as_deref()
                .is_none_or(|wanted| op.table == wanted)
                && filter.status.is_none_or(|wanted| op.sync_status == wanted)
        }))
    }

    fn update_status(
        &self,
        local_id: i64,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let mut ops = self.ops.write();
        let op = ops
            .get_mut(&local_id)
            .ok_or_else(|| OutpostError::NotFound(format!("operation {local_id}")))?;
        check_transition(local_id, op.sync_status, status)?;
        op.sync_status = status;
        if let Some(message) = error {
            op.last_error = Some(message.to_string());
        }
        let mut completed = self.completed.write();
        if status.is_terminal() {
            completed.insert(local_id, Utc::now());
        } else {
            completed.remove(&local_id);
        }
        Ok(())
    }

    fn record_attempt(&self, local_id: i64, error: Option<&str>) -> Result<()> {
        let mut ops = self.ops.write();
        let op = ops
            .get_mut(&local_id)
            .ok_or_else(|| OutpostError::NotFound(format!("operation {local_id}")))?;
        op.attempts += 1;
        op.last_error = error.map(str::to_string);
        Ok(())
    }

    fn replace_payload(
        &self,
        local_id: i64,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<()> {
        let mut ops = self.ops.write();
        let op = ops
            .get_mut(&local_id)
            .ok_or_else(|| OutpostError::NotFound(format!("operation {local_id}")))?;
        op.payload = payload.clone();
        op.base_version = base_version;
        Ok(())
    }

    fn remove_operation(&self, local_id: i64) -> Result<()> {
        if self.ops.write().remove(&local_id).is_none() {
            return Err(OutpostError::NotFound(format!("operation {local_id}")));
        }
        self.completed.write().remove(&local_id);
        Ok(())
    }

    fn cache_records(&self, table: &str, records: &[CachedRecord]) -> Result<()> {
        let mut cache = self.cache.write();
        let rows = cache.entry(table.to_string()).or_default();
        for record in records {
            match rows.get(&record.record_id) {
                // Version regression: keep the newer cached row.
                Some(existing) if existing.version > record.version => {}
                _ => {
                    rows.insert(record.record_id.clone(), record.clone());
                }
            }
        }
        Ok(())
    }

    fn get_cached(&self, table: &str, record_id: &str) -> Result<Option<CachedRecord>> {
        Ok(self
            .cache
            .read()
            .get(table)
            .and_then(|rows| rows.get(record_id))
            .cloned())
    }

    fn list_cached(&self, table: &str) -> Result<Vec<CachedRecord>> {
        Ok(self
            .cache
            .read()
            .get(table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default())
    }

    fn remove_cached(&self, table: &str, record_id: &str) -> Result<()> {
        if let Some(rows) = self.cache.write().get_mut(table) {
            rows.remove(record_id);
        }
        Ok(())
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        // No meaningful byte count without a file behind us.
        Ok(StorageInfo {
            used_bytes: 0,
            quota_bytes: self.quota_bytes,
        })
    }

    fn purge_synced(&self, older_than: Duration) -> Result<u64> {
        let window = chrono::Duration::from_std(older_than)
            .map_err(|err| OutpostError::Config(format!("retention window out of range: {err}")))?;
        let cutoff = Utc::now() - window;
        let mut ops = self.ops.write();
        let completed = self.completed.read();
        let stale: Vec<i64> = ops
            .values()
            .filter(|op| {
                op.sync_status == SyncStatus::Synced
                    && completed
                        .get(&op.local_id)
                        .is_some_and(|at| *at < cutoff)
            })
            .map(|op| op.local_id)
            .collect();
        for local_id in &stale {
            ops.remove(local_id);
        }
        Ok(stale.len() as u64)
    }

    fn count_by_status(&self, status: SyncStatus) -> Result<u64> {
        Ok(self
            .ops
            .read()
            .values()
            .filter(|op| op.sync_status == status)
            .count() as u64)
    }
}
