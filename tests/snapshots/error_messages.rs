use insta::assert_snapshot;

use outpost::error::{OutpostError, RemoteFailure};

#[test]
fn test_error_remote_failure() {
    let err = OutpostError::Remote(RemoteFailure::new(
        409,
        "version 3 is behind server version 5",
    ));
    assert_snapshot!(err.to_string(), @"Remote call failed (409): version 3 is behind server version 5");
}

#[test]
fn test_error_invalid_transition() {
    let err = OutpostError::InvalidTransition {
        local_id: 7,
        from: "synced".to_string(),
        to: "syncing".to_string(),
    };
    assert_snapshot!(err.to_string(), @"Invalid status transition for operation 7: synced -> syncing");
}

#[test]
fn test_error_drain_in_progress() {
    let err = OutpostError::DrainInProgress;
    assert_snapshot!(err.to_string(), @"Drain already in progress");
}

#[test]
fn test_error_timeout() {
    let err = OutpostError::Timeout("remote call exceeded 10s".to_string());
    assert_snapshot!(err.to_string(), @"Timeout: remote call exceeded 10s");
}

#[test]
fn test_error_not_found() {
    let err = OutpostError::NotFound("operation 42".to_string());
    assert_snapshot!(err.to_string(), @"Not found: operation 42");
}

#[test]
fn test_error_config() {
    let err = OutpostError::Config("remote.base_url is not set".to_string());
    assert_snapshot!(err.to_string(), @"Config error: remote.base_url is not set");
}

#[test]
fn test_error_storage_unavailable() {
    let err = OutpostError::StorageUnavailable("cannot open database".to_string());
    assert_snapshot!(err.to_string(), @"Storage unavailable: cannot open database");
}

#[test]
fn test_error_channel() {
    let err = OutpostError::Channel("event stream closed by peer".to_string());
    assert_snapshot!(err.to_string(), @"Channel error: event stream closed by peer");
}
