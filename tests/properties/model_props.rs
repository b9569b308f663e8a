use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use serde_json::Value;

use outpost::error::ErrorClass;
use outpost::model::{OpKind, Payload, PendingOperation, SyncEvent, SyncStatus};

const CLASSES: [ErrorClass; 9] = [
    ErrorClass::Network,
    ErrorClass::Timeout,
    ErrorClass::Validation,
    ErrorClass::Auth,
    ErrorClass::NotFound,
    ErrorClass::Conflict,
    ErrorClass::RateLimit,
    ErrorClass::Server,
    ErrorClass::Unknown,
];

fn arb_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::from),
    ]
}

fn arb_payload() -> impl Strategy<Value = Payload> {
    prop::collection::btree_map("[a-z][a-z0-9_]{0,8}", arb_value(), 0..6)
        .prop_map(|fields| fields.into_iter().collect())
}

fn arb_kind() -> impl Strategy<Value = OpKind> {
    prop_oneof![
        Just(OpKind::Create),
        Just(OpKind::Update),
        Just(OpKind::Delete),
    ]
}

fn arb_status() -> impl Strategy<Value = SyncStatus> {
    prop_oneof![
        Just(SyncStatus::Pending),
        Just(SyncStatus::Syncing),
        Just(SyncStatus::Synced),
        Just(SyncStatus::Error),
    ]
}

fn arb_event() -> impl Strategy<Value = SyncEvent> {
    (
        "[a-z]{3,10}",
        arb_kind(),
        r"[a-zA-Z0-9\-]{1,10}",
        arb_payload(),
        0i64..4_000_000_000i64,
        prop::option::of(r"[a-z0-9\-]{1,12}"),
        prop::option::of(1i64..1_000_000i64),
    )
        .prop_map(
            |(table, operation, record_id, payload, seconds, origin, version)| {
                let mut event = SyncEvent::new(table, operation, record_id, payload);
                event.timestamp = Utc.timestamp_opt(seconds, 0).unwrap();
                event.origin_user_id = origin;
                event.version = version;
                event
            },
        )
}

fn arb_operation() -> impl Strategy<Value = PendingOperation> {
    (
        1i64..100_000i64,
        "[a-z]{3,10}",
        arb_kind(),
        prop::option::of(r"[a-zA-Z0-9\-]{1,10}"),
        arb_payload(),
        0i64..4_000_000_000i64,
        arb_status(),
        0u32..10u32,
        prop::option::of(".{1,40}"),
        prop::option::of(1i64..1_000_000i64),
    )
        .prop_map(
            |(
                local_id,
                table,
                kind,
                record_id,
                payload,
                seconds,
                sync_status,
                attempts,
                last_error,
                base_version,
            )| PendingOperation {
                local_id,
                table,
                kind,
                record_id,
                payload,
                created_at: Utc.timestamp_opt(seconds, 0).unwrap(),
                sync_status,
                attempts,
                last_error,
                idempotency_key: format!("key-{local_id}"),
                base_version,
            },
        )
}

proptest! {
    #[test]
    fn test_event_wire_round_trip(event in arb_event()) {
        let serialized = serde_json::to_string(&event).unwrap();
        let parsed: SyncEvent = serde_json::from_str(&serialized).unwrap();
        prop_assert_eq!(parsed, event);
    }

    #[test]
    fn test_operation_wire_round_trip(op in arb_operation()) {
        let serialized = serde_json::to_string(&op).unwrap();
        let parsed: PendingOperation = serde_json::from_str(&serialized).unwrap();
        prop_assert_eq!(parsed, op);
    }

    #[test]
    fn test_every_status_code_classifies(status in any::<u16>()) {
        let class = ErrorClass::from_status(status);
        prop_assert!(CLASSES.contains(&class));
        // Retryable and terminal partition the taxonomy; conflict is neither.
        prop_assert!(!(class.is_retryable() && class.is_terminal()));
        if class == ErrorClass::Conflict {
            prop_assert!(!class.is_retryable());
            prop_assert!(!class.is_terminal());
        }
    }

    #[test]
    fn test_record_key_is_total(op in arb_operation()) {
        let (table, record) = op.record_key();
        prop_assert_eq!(&table, &op.table);
        match &op.record_id {
            Some(id) => prop_assert_eq!(&record, id),
            None => prop_assert_eq!(record, format!("local:{}", op.local_id)),
        }
    }
}
