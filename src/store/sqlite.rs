//! SQLite-backed durable store.

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, Row, params};
use uuid::Uuid;

use crate::error::{OutpostError, Result};
use crate::model::{
    CachedRecord, NewPendingOperation, OpKind, OperationFilter, Payload, PendingOperation,
    StorageInfo, SyncStatus,
};
use crate::store::{DurableStore, check_transition, migrations};

const OPERATION_COLUMNS: &str = "local_id, tbl, kind, record_id, payload, created_at, \
     sync_status, attempts, last_error, idempotency_key, base_version";

/// Durable store backed by a local SQLite file.
///
/// The connection is serialized behind a mutex; every call is a single
/// transaction from the caller's point of view.
pub struct SqliteStore {
    conn: Mutex<Connection>,
    schema_version: u32,
    quota_bytes: u64,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("schema_version", &self.schema_version)
            .field("quota_bytes", &self.quota_bytes)
            .finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Open (or create) the store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_quota(path, 0)
    }

    /// Open the store with a soft quota used by [`storage_info`].
    ///
    /// [`storage_info`]: DurableStore::storage_info
    pub fn open_with_quota(path: impl AsRef<Path>, quota_bytes: u64) -> Result<Self> {
        let path = path.as_ref();

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|err| {
            OutpostError::StorageUnavailable(format!("{}: {err}", path.display()))
        })?;

        Self::configure_pragmas(&conn)?;
        let schema_version = migrations::run_migrations(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            schema_version,
            quota_bytes,
        })
    }

    /// Current schema version after migrations.
    pub fn schema_version(&self) -> u32 {
        self.schema_version
    }

    /// Run `PRAGMA integrity_check` and report whether the file is sound.
    pub fn integrity_check(&self) -> Result<bool> {
        let conn = self.conn.lock();
        let result: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
        Ok(result == "ok")
    }

    fn configure_pragmas(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA cache_size = -64000;
             PRAGMA temp_store = MEMORY;
             PRAGMA foreign_keys = ON;",
        )?;
        Ok(())
    }

    fn current_status(conn: &Connection, local_id: i64) -> Result<SyncStatus> {
        let mut stmt =
            conn.prepare("SELECT sync_status FROM pending_operations WHERE local_id = ?")?;
        let mut rows = stmt.query([local_id])?;
        if let Some(row) = rows.next()? {
            let raw: String = row.get(0)?;
            return raw.parse();
        }
        Err(OutpostError::NotFound(format!("operation {local_id}")))
    }
}

impl DurableStore for SqliteStore {
    fn append(&self, op: NewPendingOperation) -> Result<i64> {
        let payload = serde_json::to_string(&op.payload)?;
        let conn = self.conn.lock();
        conn.execute(
            "INSERT INTO pending_operations (
                tbl, kind, record_id, payload, created_at,
                sync_status, attempts, idempotency_key, base_version
             ) VALUES (?, ?, ?, ?, ?, 'pending', 0, ?, ?)",
            params![
                op.table,
                op.kind.as_str(),
                op.record_id,
                payload,
                ts(&Utc::now()),
                Uuid::new_v4().to_string(),
                op.base_version,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    fn list_pending(&self, table: Option<&str>) -> Result<Vec<PendingOperation>> {
        let conn = self.conn.lock();
        let mut ops = Vec::new();
        match table {
            Some(table) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations \
                     WHERE sync_status = 'pending' AND tbl = ? \
                     ORDER BY created_at, local_id"
                ))?;
                let rows = stmt.query_map([table], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations \
                     WHERE sync_status = 'pending' \
                     ORDER BY created_at, local_id"
                ))?;
                let rows = stmt.query_map([], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
        }
        Ok(ops)
    }

    fn get_operation(&self, local_id: i64) -> Result<Option<PendingOperation>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE local_id = ?"
        ))?;
        let mut rows = stmt.query([local_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(operation_from_row(row)?));
        }
        Ok(None)
    }

    fn list_operations(&self, filter: &OperationFilter) -> Result<Vec<PendingOperation>> {
        let conn = self.conn.lock();
        let order = "ORDER BY created_at, local_id";
        let mut ops = Vec::new();
        match (filter.table.as_deref(), filter.status) {
            (Some(table), Some(status)) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations \
                     WHERE tbl = ? AND sync_status = ? {order}"
                ))?;
                let rows = stmt.query_map(params![table, status.as_str()], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
            (Some(table), None) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations WHERE tbl = ? {order}"
                ))?;
                let rows = stmt.query_map([table], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
            (None, Some(status)) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations \
                     WHERE sync_status = ? {order}"
                ))?;
                let rows = stmt.query_map([status.as_str()], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
            (None, None) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {OPERATION_COLUMNS} FROM pending_operations {order}"
                ))?;
                let rows = stmt.query_map([], operation_from_row)?;
                for row in rows {
                    ops.push(row?);
                }
            }
        }
        Ok(ops)
    }

    fn update_status(
        &self,
        local_id: i64,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let conn = self.conn.lock();
        let current = Self::current_status(&conn, local_id)?;
        check_transition(local_id, current, status)?;

        let completed = status.is_terminal().then(|| ts(&Utc::now()));
        match error {
            Some(message) => {
                conn.execute(
                    "UPDATE pending_operations \
                     SET sync_status = ?, last_error = ?, completed_at = ? \
                     WHERE local_id = ?",
                    params![status.as_str(), message, completed, local_id],
                )?;
            }
            None => {
                conn.execute(
                    "UPDATE pending_operations SET sync_status = ?, completed_at = ? \
                     WHERE local_id = ?",
                    params![status.as_str(), completed, local_id],
                )?;
            }
        }
        Ok(())
    }

    fn record_attempt(&self, local_id: i64, error: Option<&str>) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE pending_operations SET attempts = attempts + 1, last_error = ? \
             WHERE local_id = ?",
            params![error, local_id],
        )?;
        if changed == 0 {
            return Err(OutpostError::NotFound(format!("operation {local_id}")));
        }
        Ok(())
    }

    fn replace_payload(
        &self,
        local_id: i64,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<()> {
        let encoded = serde_json::to_string(payload)?;
        let conn = self.conn.lock();
        let changed = conn.execute(
            "UPDATE pending_operations SET payload = ?, base_version = ? WHERE local_id = ?",
            params![encoded, base_version, local_id],
        )?;
        if changed == 0 {
            return Err(OutpostError::NotFound(format!("operation {local_id}")));
        }
        Ok(())
    }

    fn remove_operation(&self, local_id: i64) -> Result<()> {
        let conn = self.conn.lock();
        let changed = conn.execute(
            "DELETE FROM pending_operations WHERE local_id = ?",
            [local_id],
        )?;
        if changed == 0 {
            return Err(OutpostError::NotFound(format!("operation {local_id}")));
        }
        Ok(())
    }

    fn cache_records(&self, table: &str, records: &[CachedRecord]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO cached_records (tbl, record_id, version, last_modified, payload)
                 VALUES (?, ?, ?, ?, ?)
                 ON CONFLICT(tbl, record_id) DO UPDATE SET
                     version = excluded.version,
                     last_modified = excluded.last_modified,
                     payload = excluded.payload
                 WHERE excluded.version >= cached_records.version",
            )?;
            for record in records {
                let payload = serde_json::to_string(&record.payload)?;
                stmt.execute(params![
                    table,
                    record.record_id,
                    record.version,
                    ts(&record.last_modified),
                    payload,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn get_cached(&self, table: &str, record_id: &str) -> Result<Option<CachedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_id, version, last_modified, payload FROM cached_records \
             WHERE tbl = ? AND record_id = ?",
        )?;
        let mut rows = stmt.query([table, record_id])?;
        if let Some(row) = rows.next()? {
            return Ok(Some(cached_from_row(row)?));
        }
        Ok(None)
    }

    fn list_cached(&self, table: &str) -> Result<Vec<CachedRecord>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT record_id, version, last_modified, payload FROM cached_records \
             WHERE tbl = ? ORDER BY record_id",
        )?;
        let rows = stmt.query_map([table], cached_from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    fn remove_cached(&self, table: &str, record_id: &str) -> Result<()> {
        let conn = self.conn.lock();
        conn.execute(
            "DELETE FROM cached_records WHERE tbl = ? AND record_id = ?",
            [table, record_id],
        )?;
        Ok(())
    }

    fn storage_info(&self) -> Result<StorageInfo> {
        let conn = self.conn.lock();
        let page_count: i64 = conn.query_row("PRAGMA page_count;", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size;", [], |row| row.get(0))?;
        Ok(StorageInfo {
            used_bytes: page_count.max(0) as u64 * page_size.max(0) as u64,
            quota_bytes: self.quota_bytes,
        })
    }

    fn purge_synced(&self, older_than: std::time::Duration) -> Result<u64> {
        let window = chrono::Duration::from_std(older_than)
            .map_err(|err| OutpostError::Config(format!("retention window out of range: {err}")))?;
        let cutoff = Utc::now() - window;
        let conn = self.conn.lock();
        let purged = conn.execute(
            "DELETE FROM pending_operations \
             WHERE sync_status = 'synced' AND completed_at IS NOT NULL AND completed_at < ?",
            [ts(&cutoff)],
        )?;
        Ok(purged as u64)
    }

    fn count_by_status(&self, status: SyncStatus) -> Result<u64> {
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM pending_operations WHERE sync_status = ?",
            [status.as_str()],
            |row| row.get(0),
        )?;
        Ok(count.max(0) as u64)
    }
}

/// Fixed-width RFC 3339 so TEXT comparison orders chronologically.
fn ts(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(raw: &str, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
        })
}

fn parse_payload(raw: &str, idx: usize) -> rusqlite::Result<Payload> {
    serde_json::from_str(raw).map_err(|err| {
        rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
    })
}

fn operation_from_row(row: &Row<'_>) -> rusqlite::Result<PendingOperation> {
    let kind: String = row.get(2)?;
    let payload: String = row.get(4)?;
    let created_at: String = row.get(5)?;
    let sync_status: String = row.get(6)?;
    Ok(PendingOperation {
        local_id: row.get(0)?,
        table: row.get(1)?,
        kind: kind.parse::<OpKind>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(2, rusqlite::types::Type::Text, Box::new(err))
        })?,
        record_id: row.get(3)?,
        payload: parse_payload(&payload, 4)?,
        created_at: parse_ts(&created_at, 5)?,
        sync_status: sync_status.parse::<SyncStatus>().map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Text, Box::new(err))
        })?,
        attempts: row.get(7)?,
        last_error: row.get(8)?,
        idempotency_key: row.get(9)?,
        base_version: row.get(10)?,
    })
}

fn cached_from_row(row: &Row<'_>) -> rusqlite::Result<CachedRecord> {
    let last_modified: String = row.get(2)?;
    let payload: String = row.get(3)?;
    Ok(CachedRecord {
        record_id: row.get(0)?,
        version: row.get(1)?,
        last_modified: parse_ts(&last_modified, 2)?,
        payload: parse_payload(&payload, 3)?,
    })
}
