//! Resolution policy and tie-break tables.

use chrono::{Duration, Utc};
use outpost::conflict::{
    self, Conflict, ConflictPolicy, ResolutionAction, TieBreak,
};
use outpost::model::payload_from;
use outpost::test_utils::{TestCase, run_table_tests};
use serde_json::json;

/// A price collision plus one field unique to each side. `local_newer`
/// controls which side the last-writer tie-break favors.
fn price_conflict(local_newer: bool) -> Conflict {
    let now = Utc::now();
    let (local_modified, remote_modified) = if local_newer {
        (now, now - Duration::seconds(90))
    } else {
        (now - Duration::seconds(90), now)
    };
    Conflict {
        id: "c-1".to_string(),
        table: "products".to_string(),
        record_id: "P1".to_string(),
        local_op_id: 7,
        fields: vec!["price".to_string()],
        local_value: payload_from(&[("price", json!(10)), ("notes", json!("recount"))]),
        remote_value: payload_from(&[("price", json!(12)), ("stock", json!(7))]),
        local_version: Some(5),
        remote_version: Some(6),
        local_modified,
        remote_modified,
        remote_deleted: false,
        detected_at: now,
        resolution_policy: None,
    }
}

#[test]
fn each_policy_maps_to_one_action() {
    run_table_tests(
        vec![
            TestCase {
                name: "accept-local keeps pushing",
                input: ConflictPolicy::AcceptLocal,
                expected: ResolutionAction::RetryLocal,
            },
            TestCase {
                name: "accept-remote drops the local write",
                input: ConflictPolicy::AcceptRemote,
                expected: ResolutionAction::DiscardLocal,
            },
            TestCase {
                name: "merge re-pends the union",
                input: ConflictPolicy::Merge,
                expected: ResolutionAction::ReplaceLocal,
            },
        ],
        |policy| conflict::resolve(&price_conflict(false), *policy, TieBreak::default()).action,
    );
}

#[test]
fn tie_break_decides_colliding_fields() {
    run_table_tests(
        vec![
            TestCase {
                name: "remote-wins takes the remote price",
                input: (TieBreak::RemoteWins, true),
                expected: json!(12),
            },
            TestCase {
                name: "local-wins takes the local price",
                input: (TieBreak::LocalWins, false),
                expected: json!(10),
            },
            TestCase {
                name: "last-writer-wins with a newer local write",
                input: (TieBreak::LastWriterWins, true),
                expected: json!(10),
            },
            TestCase {
                name: "last-writer-wins with a newer remote write",
                input: (TieBreak::LastWriterWins, false),
                expected: json!(12),
            },
        ],
        |(tie_break, local_newer)| {
            conflict::resolve(&price_conflict(*local_newer), ConflictPolicy::Merge, *tie_break)
                .payload["price"]
                .clone()
        },
    );
}

#[test]
fn merge_keeps_fields_only_one_side_touched() {
    for tie_break in [TieBreak::LastWriterWins, TieBreak::RemoteWins, TieBreak::LocalWins] {
        let merged = conflict::resolve(&price_conflict(true), ConflictPolicy::Merge, tie_break);
        assert_eq!(merged.payload["notes"], json!("recount"), "{tie_break}");
        assert_eq!(merged.payload["stock"], json!(7), "{tie_break}");
    }
}

#[test]
fn resolution_always_advances_to_the_remote_version() {
    for policy in [
        ConflictPolicy::AcceptLocal,
        ConflictPolicy::AcceptRemote,
        ConflictPolicy::Merge,
    ] {
        let resolution = conflict::resolve(&price_conflict(false), policy, TieBreak::default());
        assert_eq!(resolution.version, Some(6), "{policy}");
        assert_eq!(resolution.policy, policy);
    }
}
