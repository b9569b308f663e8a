//! Core data model: pending operations, cached records, and sync events.
//!
//! Everything that crosses the store boundary or the wire lives here. Wire
//! JSON is camelCase; enum values are kebab-case.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::OutpostError;

/// Opaque key→value payload attached to operations, records, and events.
///
/// `serde_json::Value` is the closed sum type (string/number/bool/null/array/
/// map) that preserves round-trip fidelity without dynamic typing.
pub type Payload = Map<String, Value>;

/// Mutation kind recorded in the operation queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OpKind {
    Create,
    Update,
    Delete,
}

impl OpKind {
    /// Stable string form, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpKind {
    type Err = OutpostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(OutpostError::Config(format!(
                "unknown operation kind: {other}"
            ))),
        }
    }
}

/// Lifecycle status of a pending operation.
///
/// Legal transitions: `pending → syncing`, `syncing → synced`,
/// `syncing → error`, `syncing → pending` (timeout revert), and
/// `error → pending` (manual re-submission). Anything else is rejected by the
/// store so an operation can never be silently dropped or resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SyncStatus {
    Pending,
    Syncing,
    Synced,
    Error,
}

impl SyncStatus {
    /// Stable string form, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Whether the operation has reached a terminal state for this drain.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Synced | Self::Error)
    }

    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Syncing)
                | (Self::Syncing, Self::Synced | Self::Error | Self::Pending)
                | (Self::Error, Self::Pending)
        )
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = OutpostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "syncing" => Ok(Self::Syncing),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(OutpostError::Config(format!("unknown sync status: {other}"))),
        }
    }
}

/// A locally recorded mutation not yet confirmed by the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingOperation {
    pub local_id: i64,
    pub table: String,
    pub kind: OpKind,
    /// `None` only for creates, where the remote store assigns the id.
    pub record_id: Option<String>,
    pub payload: Payload,
    pub created_at: DateTime<Utc>,
    pub sync_status: SyncStatus,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Stable token presented to the remote service on every attempt, so a
    /// replayed create cannot produce a duplicate record.
    pub idempotency_key: String,
    /// Cached-record version this write was based on; conflict comparison
    /// input. `None` when the record had never been seen locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,
}

impl PendingOperation {
    /// Queue key for the single-writer-per-record discipline.
    ///
    /// Creates have no record id yet; they key on the operation itself.
    #[must_use]
    pub fn record_key(&self) -> (String, String) {
        let record = self
            .record_id
            .clone()
            .unwrap_or_else(|| format!("local:{}", self.local_id));
        (self.table.clone(), record)
    }
}

/// Shape accepted by [`append`](crate::store::DurableStore::append); the store
/// assigns `local_id`, `created_at`, `idempotency_key`, and initial status.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPendingOperation {
    pub table: String,
    pub kind: OpKind,
    pub record_id: Option<String>,
    pub payload: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_version: Option<i64>,
}

impl NewPendingOperation {
    /// A create for a record the remote store has not assigned an id to yet.
    #[must_use]
    pub fn create(table: impl Into<String>, payload: Payload) -> Self {
        Self {
            table: table.into(),
            kind: OpKind::Create,
            record_id: None,
            payload,
            base_version: None,
        }
    }

    /// A partial update of an existing record.
    #[must_use]
    pub fn update(
        table: impl Into<String>,
        record_id: impl Into<String>,
        payload: Payload,
        base_version: Option<i64>,
    ) -> Self {
        Self {
            table: table.into(),
            kind: OpKind::Update,
            record_id: Some(record_id.into()),
            payload,
            base_version,
        }
    }

    /// A delete of an existing record.
    #[must_use]
    pub fn delete(
        table: impl Into<String>,
        record_id: impl Into<String>,
        base_version: Option<i64>,
    ) -> Self {
        Self {
            table: table.into(),
            kind: OpKind::Delete,
            record_id: Some(record_id.into()),
            payload: Payload::new(),
            base_version,
        }
    }
}

/// Snapshot of a remote entity cached locally, keyed externally by
/// `(table, record_id)`.
///
/// Immutable until overwritten; `version` only ever advances.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedRecord {
    pub record_id: String,
    pub version: i64,
    pub last_modified: DateTime<Utc>,
    pub payload: Payload,
}

impl CachedRecord {
    #[must_use]
    pub fn new(record_id: impl Into<String>, version: i64, payload: Payload) -> Self {
        Self {
            record_id: record_id.into(),
            version,
            last_modified: Utc::now(),
            payload,
        }
    }
}

/// Wire representation of a change, broadcast over the event channel and to
/// in-process subscribers. Transient; never persisted beyond delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEvent {
    pub table: String,
    pub operation: OpKind,
    pub record_id: String,
    #[serde(default)]
    pub payload: Payload,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_user_id: Option<String>,
    /// Record version after the change, when the origin store versions rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

impl SyncEvent {
    #[must_use]
    pub fn new(
        table: impl Into<String>,
        operation: OpKind,
        record_id: impl Into<String>,
        payload: Payload,
    ) -> Self {
        Self {
            table: table.into(),
            operation,
            record_id: record_id.into(),
            payload,
            timestamp: Utc::now(),
            origin_user_id: None,
            version: None,
        }
    }

    #[must_use]
    pub fn with_version(mut self, version: i64) -> Self {
        self.version = Some(version);
        self
    }

    #[must_use]
    pub fn with_origin(mut self, user_id: impl Into<String>) -> Self {
        self.origin_user_id = Some(user_id.into());
        self
    }
}

/// Storage usage as reported by the quota probe.
///
/// Hosts without a quota capability report zeroes rather than failing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageInfo {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl StorageInfo {
    /// Fraction of quota in use; `None` when the quota is unknown.
    #[must_use]
    pub fn usage_ratio(&self) -> Option<f64> {
        if self.quota_bytes == 0 {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        Some(self.used_bytes as f64 / self.quota_bytes as f64)
    }
}

/// Filter for queue inspection queries.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationFilter {
    pub table: Option<String>,
    pub status: Option<SyncStatus>,
}

impl OperationFilter {
    #[must_use]
    pub fn by_status(status: SyncStatus) -> Self {
        Self {
            table: None,
            status: Some(status),
        }
    }

    #[must_use]
    pub fn by_table(table: impl Into<String>) -> Self {
        Self {
            table: Some(table.into()),
            status: None,
        }
    }
}

/// Build a payload from key/value pairs; test and example convenience.
#[must_use]
pub fn payload_from(pairs: &[(&str, Value)]) -> Payload {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), v.clone()))
        .collect()
}
