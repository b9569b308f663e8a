use std::collections::HashSet;

use proptest::prelude::*;
use serde_json::json;

use outpost::model::{NewPendingOperation, SyncStatus, payload_from};
use outpost::store::{DurableStore, MemoryStore};

proptest! {
    #[test]
    fn test_append_preserves_arrival_order(tables in prop::collection::vec("[a-z]{3,8}", 1..20)) {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for (index, table) in tables.iter().enumerate() {
            let payload = payload_from(&[("n", json!(index))]);
            ids.push(
                store
                    .append(NewPendingOperation::create(table.as_str(), payload))
                    .unwrap(),
            );
        }
        prop_assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));

        let pending = store.list_pending(None).unwrap();
        let listed: Vec<i64> = pending.iter().map(|op| op.local_id).collect();
        prop_assert_eq!(listed, ids);
        prop_assert!(pending.iter().all(|op| op.sync_status == SyncStatus::Pending));

        // Idempotency keys are unique per operation, not per record.
        let keys: HashSet<&str> = pending.iter().map(|op| op.idempotency_key.as_str()).collect();
        prop_assert_eq!(keys.len(), pending.len());
    }

    #[test]
    fn test_table_filter_partitions_the_queue(
        tables in prop::collection::vec(prop_oneof![Just("alpha"), Just("beta")], 1..20),
    ) {
        let store = MemoryStore::new();
        for (index, table) in tables.iter().enumerate() {
            let payload = payload_from(&[("n", json!(index))]);
            store
                .append(NewPendingOperation::create(*table, payload))
                .unwrap();
        }

        let alpha = store.list_pending(Some("alpha")).unwrap();
        let beta = store.list_pending(Some("beta")).unwrap();
        prop_assert!(alpha.iter().all(|op| op.table == "alpha"));
        prop_assert!(beta.iter().all(|op| op.table == "beta"));
        prop_assert_eq!(alpha.len() + beta.len(), tables.len());
        prop_assert!(alpha.windows(2).all(|pair| pair[0].local_id < pair[1].local_id));
        prop_assert!(beta.windows(2).all(|pair| pair[0].local_id < pair[1].local_id));
    }
}
