//! Driving the orchestrator from a live event channel: inbound changes apply
//! to the cache, confirmed local mutations flow back out, and a dropped peer
//! shuts the loop down cleanly.

use std::sync::Arc;
use std::time::Duration;

use outpost::channel::{EventChannel, LocalChannel};
use outpost::model::{OpKind, SyncEvent, payload_from};
use outpost::store::DurableStore;
use outpost::sync::SyncOrchestrator;
use serde_json::json;
use tokio::time::timeout;

use crate::fixture::Harness;

async fn wait_for_cached(
    orch: &SyncOrchestrator,
    table: &str,
    record_id: &str,
    version: i64,
) -> outpost::model::CachedRecord {
    for _ in 0..200 {
        if let Some(cached) = orch.store().get_cached(table, record_id).unwrap() {
            if cached.version >= version {
                return cached;
            }
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("record {table}/{record_id} never reached version {version}");
}

#[tokio::test]
async fn channel_session_applies_inbound_and_forwards_outbound() {
    let harness = Harness::new("live channel session");
    let orch = harness.start();

    let (client_end, mut server_end) = LocalChannel::pair(16);
    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run(client_end).await })
    };

    harness.log_step("The session comes up online");
    let mut network = orch.network_watch();
    timeout(Duration::from_secs(2), network.wait_for(|online| *online))
        .await
        .expect("went online")
        .unwrap();

    harness.log_step("An inbound change from another device reaches the cache");
    let inbound = SyncEvent::new(
        "products",
        OpKind::Update,
        "P1",
        payload_from(&[("price", json!(12))]),
    )
    .with_version(2)
    .with_origin("device-b");
    server_end.send(&inbound).await.unwrap();

    let cached = wait_for_cached(&orch, "products", "P1", 2).await;
    assert_eq!(cached.payload["price"], json!(12));

    harness.log_step("A local mutation is confirmed and forwarded to the peer");
    orch.submit(
        "materials",
        OpKind::Create,
        None,
        payload_from(&[("name", json!("Cement")), ("stock", json!(30))]),
    )
    .await
    .unwrap();

    let forwarded = timeout(Duration::from_secs(2), server_end.next_event())
        .await
        .expect("confirmation forwarded")
        .unwrap()
        .expect("channel open");
    assert_eq!(forwarded.table, "materials");
    assert_eq!(forwarded.operation, OpKind::Create);
    assert_eq!(forwarded.origin_user_id.as_deref(), Some("device-a"));
    assert_eq!(forwarded.version, Some(1));

    harness.log_step("Dropping the peer ends the session");
    drop(server_end);
    let result = timeout(Duration::from_secs(2), runner)
        .await
        .expect("run loop exits")
        .unwrap();
    assert!(result.is_ok());
    assert!(!orch.is_online(), "session exit reports offline");
}

#[tokio::test]
async fn own_echoes_coming_back_are_not_reapplied() {
    let harness = Harness::new("echo suppression over the channel");
    let orch = harness.start();

    let (client_end, mut server_end) = LocalChannel::pair(16);
    let runner = {
        let orch = Arc::clone(&orch);
        tokio::spawn(async move { orch.run(client_end).await })
    };
    let mut network = orch.network_watch();
    timeout(Duration::from_secs(2), network.wait_for(|online| *online))
        .await
        .expect("went online")
        .unwrap();

    // A change of ours, bounced back by the service with our identity.
    let echo = SyncEvent::new(
        "products",
        OpKind::Update,
        "P1",
        payload_from(&[("price", json!(99))]),
    )
    .with_version(9)
    .with_origin("device-a");
    server_end.send(&echo).await.unwrap();

    // And a genuine foreign change afterwards, as an ordering fence.
    let foreign = SyncEvent::new(
        "products",
        OpKind::Update,
        "P2",
        payload_from(&[("price", json!(3))]),
    )
    .with_version(1)
    .with_origin("device-b");
    server_end.send(&foreign).await.unwrap();

    wait_for_cached(&orch, "products", "P2", 1).await;
    assert!(
        orch.store().get_cached("products", "P1").unwrap().is_none(),
        "echo must not materialize in the cache"
    );

    drop(server_end);
    timeout(Duration::from_secs(2), runner)
        .await
        .expect("run loop exits")
        .unwrap()
        .unwrap();
}
