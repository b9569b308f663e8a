//! Queue drains against the scripted remote, over the on-disk store.

use std::sync::Arc;
use std::time::Duration;

use outpost::error::RemoteFailure;
use outpost::model::{NewPendingOperation, Payload, SyncStatus, payload_from};
use outpost::queue::OperationQueue;
use outpost::remote::RemoteRecord;
use outpost::retry::RetryPolicy;
use outpost::store::{DurableStore, SqliteStore};
use outpost::test_utils::fixtures::{StoreFixture, material_payload};
use outpost::test_utils::logging;
use outpost::test_utils::mock_remote::MockRemote;
use serde_json::json;

fn queue_over(store: Arc<SqliteStore>) -> OperationQueue {
    logging::init();
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
        request_timeout: Duration::from_secs(2),
    };
    OperationQueue::new(store, policy, Duration::from_secs(7 * 24 * 3600), false)
}

#[tokio::test]
async fn mixed_batch_drains_in_enqueue_order() {
    let fixture = StoreFixture::new();
    let store = Arc::new(fixture.open());
    let queue = queue_over(Arc::clone(&store));
    let remote = MockRemote::new();
    remote.seed("materials", RemoteRecord::new("m-1", 1, Payload::new()));

    let ids = vec![
        queue
            .enqueue(NewPendingOperation::create(
                "materials",
                material_payload("Cement", 30),
            ))
            .unwrap(),
        queue
            .enqueue(NewPendingOperation::update(
                "materials",
                "m-1",
                payload_from(&[("stock", json!(12))]),
                Some(1),
            ))
            .unwrap(),
        queue
            .enqueue(NewPendingOperation::create(
                "projects",
                payload_from(&[("name", json!("Warehouse"))]),
            ))
            .unwrap(),
    ];

    let report = queue.drain(&remote).await.unwrap();
    assert_eq!(report.successful, ids);
    assert!(report.is_clean());

    let methods: Vec<String> = remote
        .calls()
        .iter()
        .map(|call| call.method.clone())
        .collect();
    assert_eq!(methods, vec!["create", "update", "create"]);

    // Every confirmation landed in the cache.
    let materials = store.list_cached("materials").unwrap();
    assert_eq!(materials.len(), 2);
    let projects = store.list_cached("projects").unwrap();
    assert_eq!(projects.len(), 1);
}

#[tokio::test]
async fn failed_record_does_not_block_other_records() {
    let fixture = StoreFixture::new();
    let store = Arc::new(fixture.open());
    let queue = queue_over(Arc::clone(&store));
    let remote = MockRemote::new();

    // First op updates a record the service has never seen: terminal 404.
    let doomed = queue
        .enqueue(NewPendingOperation::update(
            "materials",
            "ghost",
            payload_from(&[("stock", json!(1))]),
            None,
        ))
        .unwrap();
    let fine = queue
        .enqueue(NewPendingOperation::create(
            "materials",
            material_payload("Sand", 5),
        ))
        .unwrap();

    let report = queue.drain(&remote).await.unwrap();
    assert_eq!(report.failed, vec![doomed]);
    assert_eq!(report.successful, vec![fine]);

    let op = store.get_operation(doomed).unwrap().unwrap();
    assert_eq!(op.sync_status, SyncStatus::Error);
    assert_eq!(op.attempts, 1, "404 is terminal, no retries");
}

#[tokio::test]
async fn transient_outage_resolves_within_the_budget() {
    let fixture = StoreFixture::new();
    let store = Arc::new(fixture.open());
    let queue = queue_over(Arc::clone(&store));
    let remote = MockRemote::new();
    remote.fail_with(RemoteFailure::network("connection refused"));
    remote.fail_with(RemoteFailure::new(503, "deploy in progress"));

    let id = queue
        .enqueue(NewPendingOperation::create(
            "materials",
            material_payload("Cement", 30),
        ))
        .unwrap();

    let report = queue.drain(&remote).await.unwrap();
    assert_eq!(report.successful, vec![id]);

    let op = store.get_operation(id).unwrap().unwrap();
    assert_eq!(op.attempts, 3);
    assert_eq!(op.last_error, None, "success clears the stale failure");
}

#[tokio::test]
async fn purge_after_drain_collects_expired_synced_entries() {
    let fixture = StoreFixture::new();
    let store = Arc::new(fixture.open());
    // Zero retention: everything synced is immediately past its window.
    let policy = RetryPolicy {
        max_attempts: 3,
        base_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(4),
        multiplier: 2.0,
        request_timeout: Duration::from_secs(2),
    };
    let queue = OperationQueue::new(Arc::<SqliteStore>::clone(&store), policy, Duration::ZERO, true);
    let remote = MockRemote::new();

    let id = queue
        .enqueue(NewPendingOperation::create(
            "materials",
            material_payload("Cement", 30),
        ))
        .unwrap();
    let report = queue.drain(&remote).await.unwrap();
    assert_eq!(report.successful, vec![id]);

    // The confirmed entry is gone from the log, but the cache keeps the row.
    assert!(store.get_operation(id).unwrap().is_none());
    assert_eq!(store.list_cached("materials").unwrap().len(), 1);
}

#[tokio::test]
async fn empty_drain_is_a_clean_noop() {
    let fixture = StoreFixture::new();
    let store = Arc::new(fixture.open());
    let queue = queue_over(store);
    let remote = MockRemote::new();

    let report = queue.drain(&remote).await.unwrap();
    assert!(report.is_clean());
    assert!(report.successful.is_empty());
    assert!(remote.calls().is_empty());
}
