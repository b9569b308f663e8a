//! Conflict detection and resolution.
//!
//! A conflict exists when a pending local mutation and a remote change touch
//! the same record with divergent state. Detection is a pure function of the
//! operation and the incoming event, so the same inputs always produce the
//! same answer; resolution applies one of three policies and reports what the
//! orchestrator should do with the local operation afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use parking_lot::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::model::{OpKind, Payload, PendingOperation, SyncEvent};

/// How to reconcile a conflicted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictPolicy {
    /// Keep the local payload; the remote version is overwritten on the next
    /// successful push.
    AcceptLocal,
    /// Drop the local pending mutation and adopt the remote payload/version.
    AcceptRemote,
    /// Field-level union; same-field collisions fall to the tie-break.
    Merge,
}

impl ConflictPolicy {
    /// Stable string form, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::AcceptLocal => "accept-local",
            Self::AcceptRemote => "accept-remote",
            Self::Merge => "merge",
        }
    }
}

impl std::fmt::Display for ConflictPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Same-field tie-break for the merge policy.
///
/// The observed upstream behavior was an undocumented hard-coded remote-wins;
/// here it is a policy parameter with last-writer-wins as the default.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TieBreak {
    /// The side with the later modification timestamp keeps the field.
    #[default]
    LastWriterWins,
    RemoteWins,
    LocalWins,
}

impl TieBreak {
    /// Stable string form, matching the serde representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LastWriterWins => "last-writer-wins",
            Self::RemoteWins => "remote-wins",
            Self::LocalWins => "local-wins",
        }
    }
}

impl std::fmt::Display for TieBreak {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A detected divergence between a pending local write and remote state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conflict {
    pub id: String,
    pub table: String,
    pub record_id: String,
    /// The pending operation this conflict blocks.
    pub local_op_id: i64,
    /// Fields with divergent values, sorted for determinism.
    pub fields: Vec<String>,
    pub local_value: Payload,
    pub remote_value: Payload,
    /// Version the local write was based on; `None` when the record had never
    /// been seen locally.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_version: Option<i64>,
    /// Version carried by the remote change, when the origin versions rows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_version: Option<i64>,
    /// When the local mutation was recorded.
    pub local_modified: DateTime<Utc>,
    /// When the remote change happened.
    pub remote_modified: DateTime<Utc>,
    /// The remote side deleted the record; accept-remote must drop the
    /// cached row instead of caching an empty payload.
    #[serde(default)]
    pub remote_deleted: bool,
    pub detected_at: DateTime<Utc>,
    /// Policy applied at resolution time; `None` while unresolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolution_policy: Option<ConflictPolicy>,
}

/// What the orchestrator does with the local operation after resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionAction {
    /// Keep the local operation pending; it pushes over the remote state.
    RetryLocal,
    /// Discard the local pending operation for this record.
    DiscardLocal,
    /// Replace the local operation's payload with the merged value and
    /// re-pend it.
    ReplaceLocal,
}

/// Outcome of applying a policy to a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Resolution {
    pub policy: ConflictPolicy,
    pub action: ResolutionAction,
    /// Payload to cache locally (and, for retry/replace, to push).
    pub payload: Payload,
    /// Version the cached record advances to, when the remote carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<i64>,
}

/// Detect whether `event` conflicts with the still-unsynced `op`.
///
/// Both must refer to the same `(table, record_id)`; the caller does the
/// routing. Rules:
/// - the remote change must be *newer* than the version the local write was
///   based on (an event without a version counts as newer — its arrival means
///   a change this client did not originate);
/// - at least one touched field must actually differ. Same-value writes are
///   never conflicts, whatever the versions say.
/// - a pending delete conflicts with any newer remote live change, and a
///   remote delete conflicts with any pending update.
#[must_use]
pub fn detect(op: &PendingOperation, event: &SyncEvent) -> Option<Conflict> {
    // Creates have no remote identity yet; events cannot refer to them.
    if op.kind == OpKind::Create || op.record_id.is_none() {
        return None;
    }

    if let (Some(base), Some(remote)) = (op.base_version, event.version) {
        if remote <= base {
            // Stale echo of state we already built on.
            return None;
        }
    }

    let fields: Vec<String> = match (op.kind, event.operation) {
        // Both sides deleting is agreement, not divergence.
        (OpKind::Delete, OpKind::Delete) => return None,
        // Local delete vs a live remote change: every remote field diverges.
        (OpKind::Delete, _) => event.payload.keys().cloned().collect::<BTreeSet<_>>(),
        // Remote delete vs a local update: every locally touched field diverges.
        (_, OpKind::Delete) => op.payload.keys().cloned().collect::<BTreeSet<_>>(),
        // Live vs live: fields both sides touched with different values.
        _ => divergent_fields(&op.payload, &event.payload),
    }
    .into_iter()
    .collect();

    if fields.is_empty() {
        return None;
    }

    debug!(
        table = %op.table,
        record_id = %event.record_id,
        local_op_id = op.local_id,
        fields = ?fields,
        "Conflict detected"
    );

    Some(Conflict {
        id: Uuid::new_v4().to_string(),
        table: op.table.clone(),
        record_id: event.record_id.clone(),
        local_op_id: op.local_id,
        fields,
        local_value: op.payload.clone(),
        remote_value: event.payload.clone(),
        local_version: op.base_version,
        remote_version: event.version,
        local_modified: op.created_at,
        remote_modified: event.timestamp,
        remote_deleted: event.operation == OpKind::Delete,
        detected_at: Utc::now(),
        resolution_policy: None,
    })
}

/// Fields present on both sides with different values, sorted.
fn divergent_fields(local: &Payload, remote: &Payload) -> BTreeSet<String> {
    local
        .iter()
        .filter(|(key, value)| remote.get(*key).is_some_and(|other| other != *value))
        .map(|(key, _)| key.clone())
        .collect()
}

/// Apply `policy` to `conflict`. Pure and deterministic: the same conflict and
/// policy always yield the same resolution.
#[must_use]
pub fn resolve(conflict: &Conflict, policy: ConflictPolicy, tie_break: TieBreak) -> Resolution {
    let resolution = match policy {
        ConflictPolicy::AcceptLocal => Resolution {
            policy,
            action: ResolutionAction::RetryLocal,
            payload: conflict.local_value.clone(),
            version: conflict.remote_version,
        },
        ConflictPolicy::AcceptRemote => Resolution {
            policy,
            action: ResolutionAction::DiscardLocal,
            payload: conflict.remote_value.clone(),
            version: conflict.remote_version,
        },
        ConflictPolicy::Merge => Resolution {
            policy,
            action: ResolutionAction::ReplaceLocal,
            payload: merge_payloads(conflict, tie_break),
            version: conflict.remote_version,
        },
    };

    info!(
        conflict_id = %conflict.id,
        table = %conflict.table,
        record_id = %conflict.record_id,
        policy = %policy,
        action = ?resolution.action,
        "Conflict resolved"
    );

    resolution
}

/// Field-level union: fields only one side changed pass through; same-field
/// collisions fall to the tie-break.
fn merge_payloads(conflict: &Conflict, tie_break: TieBreak) -> Payload {
    let remote_wins_collisions = match tie_break {
        TieBreak::RemoteWins => true,
        TieBreak::LocalWins => false,
        TieBreak::LastWriterWins => conflict.remote_modified >= conflict.local_modified,
    };

    let mut merged = conflict.remote_value.clone();
    for (key, value) in &conflict.local_value {
        match conflict.remote_value.get(key) {
            // Only the local side touched this field.
            None => {
                merged.insert(key.clone(), value.clone());
            }
            Some(remote) if remote == value => {}
            Some(_) => {
                if !remote_wins_collisions {
                    merged.insert(key.clone(), value.clone());
                }
            }
        }
    }
    merged
}

/// Unresolved conflicts, visible until a caller resolves or dismisses them.
#[derive(Debug, Default)]
pub struct ConflictRegistry {
    inner: Mutex<Vec<Conflict>>,
}

impl ConflictRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a conflict and return its id.
    pub fn add(&self, conflict: Conflict) -> String {
        let id = conflict.id.clone();
        self.inner.lock().push(conflict);
        id
    }

    /// Register a conflict, replacing any active one blocking the same
    /// operation. Repeated detections (one per drain while unresolved) refresh
    /// the remote side rather than piling up duplicates. The surviving
    /// conflict keeps its original id so held handles stay valid.
    pub fn upsert(&self, mut conflict: Conflict) -> String {
        let mut inner = self.inner.lock();
        if let Some(existing) = inner
            .iter_mut()
            .find(|c| c.local_op_id == conflict.local_op_id && c.record_id == conflict.record_id)
        {
            conflict.id = existing.id.clone();
            conflict.detected_at = existing.detected_at;
            *existing = conflict;
            return existing.id.clone();
        }
        let id = conflict.id.clone();
        inner.push(conflict);
        id
    }

    /// Snapshot of all active conflicts.
    #[must_use]
    pub fn active(&self) -> Vec<Conflict> {
        self.inner.lock().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<Conflict> {
        self.inner.lock().iter().find(|c| c.id == id).cloned()
    }

    /// Remove a conflict for resolution; the caller applies the policy.
    pub fn take(&self, id: &str) -> Option<Conflict> {
        let mut inner = self.inner.lock();
        let index = inner.iter().position(|c| c.id == id)?;
        Some(inner.remove(index))
    }

    /// Discard a conflict without changing stored data.
    ///
    /// Distinct from resolution in telemetry: dismissals log their own event
    /// and never carry a policy.
    pub fn dismiss(&self, id: &str) -> bool {
        let removed = self.take(id);
        if let Some(conflict) = removed {
            info!(
                conflict_id = %conflict.id,
                table = %conflict.table,
                record_id = %conflict.record_id,
                "Conflict dismissed without resolution"
            );
            true
        } else {
            false
        }
    }
}
