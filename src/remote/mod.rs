//! Remote record service boundary.
//!
//! The queue and orchestrator only ever talk to [`RemoteStore`]; the HTTP
//! client in [`http`] is the production implementation, and tests substitute
//! a scripted one.

pub mod http;

pub use http::HttpRemote;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::model::{CachedRecord, Payload};

/// A record as the remote service returns it: identity and version alongside
/// the domain fields, which stay schemaless here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    pub version: i64,
    /// Server-side modification time, when the service reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub payload: Payload,
}

impl RemoteRecord {
    #[must_use]
    pub fn new(id: impl Into<String>, version: i64, payload: Payload) -> Self {
        Self {
            id: id.into(),
            version,
            last_modified: None,
            payload,
        }
    }

    /// Local cache row for this record.
    #[must_use]
    pub fn to_cached(&self) -> CachedRecord {
        CachedRecord {
            record_id: self.id.clone(),
            version: self.version,
            last_modified: self.last_modified.unwrap_or_else(Utc::now),
            payload: self.payload.clone(),
        }
    }
}

/// Filters and pagination for [`RemoteStore::list`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    /// Exact-match filters, sent as query parameters.
    #[serde(default, skip_serializing_if = "Payload::is_empty")]
    pub filters: Payload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub per_page: Option<u32>,
}

impl ListQuery {
    #[must_use]
    pub fn filtered(key: impl Into<String>, value: Value) -> Self {
        let mut filters = Payload::new();
        filters.insert(key.into(), value);
        Self {
            filters,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn paged(page: u32, per_page: u32) -> Self {
        Self {
            page: Some(page),
            per_page: Some(per_page),
            ..Self::default()
        }
    }
}

/// One page of list results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: u32,
    pub per_page: u32,
    /// Total matching records, when the service counts them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    pub has_more: bool,
}

/// The remote CRUD surface the sync layer pushes into and reads from.
///
/// Implementations map failures to [`RemoteFailure`] so the retry layer can
/// classify them; transport-level breakage surfaces as the `network` class.
///
/// [`RemoteFailure`]: crate::error::RemoteFailure
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Create a record. `idempotency_key` is stable across retries of the
    /// same local operation, so the service can deduplicate replays.
    async fn create(
        &self,
        table: &str,
        payload: &Payload,
        idempotency_key: &str,
    ) -> Result<RemoteRecord>;

    /// Fetch one record.
    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord>;

    /// Partially update a record. `base_version` is the version the local
    /// write was based on; services that version rows answer a stale base
    /// with a conflict failure.
    async fn update(
        &self,
        table: &str,
        id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<RemoteRecord>;

    /// Delete a record.
    async fn delete(&self, table: &str, id: &str) -> Result<()>;

    /// List records with filters and pagination.
    async fn list(&self, table: &str, query: &ListQuery) -> Result<Page<RemoteRecord>>;
}
