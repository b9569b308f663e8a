//! Scripted in-memory remote store.
//!
//! Behaves like the real record service — id assignment, version bumps,
//! stale-base conflicts, idempotent create replay — and additionally lets a
//! test script failures and latency, then inspect every call it received.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{OutpostError, RemoteFailure, Result};
use crate::model::Payload;
use crate::remote::{ListQuery, Page, RemoteRecord, RemoteStore};

/// One observed remote call, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub table: String,
    pub record_id: Option<String>,
    pub idempotency_key: Option<String>,
}

#[derive(Default)]
struct State {
    /// table → record id → record. BTreeMap keeps listings deterministic.
    records: HashMap<String, BTreeMap<String, RemoteRecord>>,
    /// Idempotency keys already honored, with the record they produced.
    created: HashMap<String, (String, String)>,
    /// Failures to return instead of the natural outcome, one per call.
    scripted: VecDeque<RemoteFailure>,
    calls: Vec<RecordedCall>,
    latency: Option<Duration>,
    next_id: u64,
}

#[derive(Default)]
pub struct MockRemote {
    state: Mutex<State>,
}

impl MockRemote {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Place a record on the service, bypassing the call log.
    pub fn seed(&self, table: &str, record: RemoteRecord) {
        self.state
            .lock()
            .records
            .entry(table.to_string())
            .or_default()
            .insert(record.id.clone(), record);
    }

    /// Script the next call to fail. Queued failures are consumed in order,
    /// one per call, before any natural behavior runs.
    pub fn fail_with(&self, failure: RemoteFailure) {
        self.state.lock().scripted.push_back(failure);
    }

    /// Delay every call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = Some(latency);
    }

    /// Every call received so far, including scripted-failure ones.
    #[must_use]
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().calls.clone()
    }

    /// Current service-side state of one record.
    #[must_use]
    pub fn record(&self, table: &str, id: &str) -> Option<RemoteRecord> {
        self.state
            .lock()
            .records
            .get(table)
            .and_then(|records| records.get(id))
            .cloned()
    }

    /// Log the call, apply latency, and pop a scripted failure if one is
    /// queued.
    async fn begin(&self, call: RecordedCall) -> Result<()> {
        let (latency, scripted) = {
            let mut state = self.state.lock();
            state.calls.push(call);
            (state.latency, state.scripted.pop_front())
        };
        if let Some(wait) = latency {
            tokio::time::sleep(wait).await;
        }
        match scripted {
            Some(failure) => Err(OutpostError::Remote(failure)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RemoteStore for MockRemote {
    async fn create(
        &self,
        table: &str,
        payload: &Payload,
        idempotency_key: &str,
    ) -> Result<RemoteRecord> {
        self.begin(RecordedCall {
            method: "create".to_string(),
            table: table.to_string(),
            record_id: None,
            idempotency_key: Some(idempotency_key.to_string()),
        })
        .await?;

        let mut state = self.state.lock();
        // Replay of a create the service already honored: same record back,
        // no duplicate.
        if let Some((seen_table, id)) = state.created.get(idempotency_key).cloned() {
            if let Some(record) = state
                .records
                .get(&seen_table)
                .and_then(|records| records.get(&id))
            {
                return Ok(record.clone());
            }
        }

        state.next_id += 1;
        let id = format!("r-{}", state.next_id);
        let record = RemoteRecord {
            id: id.clone(),
            version: 1,
            last_modified: Some(Utc::now()),
            payload: payload.clone(),
        };
        state
            .records
            .entry(table.to_string())
            .or_default()
            .insert(id.clone(), record.clone());
        state
            .created
            .insert(idempotency_key.to_string(), (table.to_string(), id));
        Ok(record)
    }

    async fn get(&self, table: &str, id: &str) -> Result<RemoteRecord> {
        self.begin(RecordedCall {
            method: "get".to_string(),
            table: table.to_string(),
            record_id: Some(id.to_string()),
            idempotency_key: None,
        })
        .await?;

        self.record(table, id)
            .ok_or_else(|| not_found(table, id))
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        payload: &Payload,
        base_version: Option<i64>,
    ) -> Result<RemoteRecord> {
        self.begin(RecordedCall {
            method: "update".to_string(),
            table: table.to_string(),
            record_id: Some(id.to_string()),
            idempotency_key: None,
        })
        .await?;

        let mut state = self.state.lock();
        let record = state
            .records
            .get_mut(table)
            .and_then(|records| records.get_mut(id))
            .ok_or_else(|| not_found(table, id))?;

        if let Some(base) = base_version {
            if base < record.version {
                return Err(OutpostError::Remote(RemoteFailure::new(
                    409,
                    format!("version {base} is behind server version {}", record.version),
                )));
            }
        }

        for (key, value) in payload {
            record.payload.insert(key.clone(), value.clone());
        }
        record.version += 1;
        record.last_modified = Some(Utc::now());
        Ok(record.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> Result<()> {
        self.begin(RecordedCall {
            method: "delete".to_string(),
            table: table.to_string(),
            record_id: Some(id.to_string()),
            idempotency_key: None,
        })
        .await?;

        let mut state = self.state.lock();
        let removed = state
            .records
            .get_mut(table)
            .and_then(|records| records.remove(id));
        match removed {
            Some(_) => Ok(()),
            None => Err(not_found(table, id)),
        }
    }

    async fn list(&self, table: &str, query: &ListQuery) -> Result<Page<RemoteRecord>> {
        self.begin(RecordedCall {
            method: "list".to_string(),
            table: table.to_string(),
            record_id: None,
            idempotency_key: None,
        })
        .await?;

        let state = self.state.lock();
        let matching: Vec<RemoteRecord> = state
            .records
            .get(table)
            .map(|records| {
                records
                    .values()
                    .filter(|record| {
                        query
                            .filters
                            .iter()
                            .all(|(key, value)| record.payload.get(key) == Some(value))
                    })
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        let page = query.page.unwrap_or(1).max(1);
        let per_page = query.per_page.unwrap_or(50).max(1);
        let start = ((page - 1) * per_page) as usize;
        let items: Vec<RemoteRecord> = matching
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect();
        let has_more = start + items.len() < matching.len();
        Ok(Page {
            items,
            page,
            per_page,
            total: Some(matching.len() as u64),
            has_more,
        })
    }
}

fn not_found(table: &str, id: &str) -> OutpostError {
    OutpostError::Remote(RemoteFailure::new(404, format!("{table}/{id} not found")))
}
