//! Test fixtures: throwaway on-disk stores and sample data builders.

use std::path::PathBuf;

use serde_json::json;
use tempfile::TempDir;

use crate::model::{Payload, payload_from};
use crate::store::SqliteStore;

/// Isolated on-disk store for durability tests.
///
/// The database lives in a temp directory that is removed with the fixture;
/// [`open`](Self::open) can be called repeatedly to simulate process restarts
/// against the same file.
pub struct StoreFixture {
    pub temp_dir: TempDir,
    pub db_path: PathBuf,
}

impl StoreFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("outpost.db");
        println!("[FIXTURE] Store path: {:?}", db_path);
        Self { temp_dir, db_path }
    }

    /// Open (or re-open) the store at the fixture path.
    pub fn open(&self) -> SqliteStore {
        SqliteStore::open(&self.db_path).expect("Failed to open store")
    }

    /// Open with an advertised quota, for storage-pressure tests.
    pub fn open_with_quota(&self, quota_bytes: u64) -> SqliteStore {
        SqliteStore::open_with_quota(&self.db_path, quota_bytes).expect("Failed to open store")
    }
}

impl Default for StoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Payload for a typical inventory material row.
#[must_use]
pub fn material_payload(name: &str, stock: i64) -> Payload {
    payload_from(&[("name", json!(name)), ("stock", json!(stock))])
}

/// Payload for a priced product row.
#[must_use]
pub fn product_payload(name: &str, price: f64) -> Payload {
    payload_from(&[("name", json!(name)), ("price", json!(price))])
}
