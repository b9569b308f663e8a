//! HTTP client against a local mock service: headers, envelope parsing, and
//! failure classification.

use std::time::Duration;

use httpmock::prelude::*;
use outpost::config::RemoteConfig;
use regex::Regex;
use outpost::error::{ErrorClass, OutpostError};
use outpost::model::payload_from;
use outpost::remote::{HttpRemote, ListQuery, RemoteStore};
use outpost::test_utils::logging;
use serde_json::json;

fn remote_for(server: &MockServer) -> HttpRemote {
    logging::init();
    let config = RemoteConfig {
        base_url: Some(server.base_url()),
        token: Some("secret-token".to_string()),
        client_name: Some("tester".to_string()),
    };
    HttpRemote::new(&config, Duration::from_secs(2)).unwrap()
}

#[tokio::test]
async fn create_posts_payload_with_idempotency_and_identity_headers() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(POST)
                .path("/materials")
                .header("X-Idempotency-Key", "op-key-1")
                .header_exists("X-Request-Id")
                .header_matches("X-Client", Regex::new(r"\(tester\)").unwrap())
                .json_body(json!({"name": "Cement", "stock": 30}));
            then.status(201).json_body(json!({
                "ok": true,
                "id": "m-1",
                "version": 1,
                "lastModified": "2026-08-20T10:00:00Z",
                "name": "Cement",
                "stock": 30
            }));
        })
        .await;

    let remote = remote_for(&server);
    let record = remote
        .create(
            "materials",
            &payload_from(&[("name", json!("Cement")), ("stock", json!(30))]),
            "op-key-1",
        )
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(record.id, "m-1");
    assert_eq!(record.version, 1);
    assert_eq!(record.payload["stock"], json!(30));
    assert!(record.last_modified.is_some());
    assert!(record.payload.get("ok").is_none(), "envelope flag stripped");
}

#[tokio::test]
async fn update_patches_with_base_version_and_bearer_auth() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(PATCH)
                .path("/products/P1")
                .header("X-Base-Version", "5")
                .header("Authorization", "Bearer secret-token")
                .json_body(json!({"price": 10}));
            then.status(200)
                .json_body(json!({"ok": true, "id": "P1", "version": 6, "price": 10}));
        })
        .await;

    let remote = remote_for(&server);
    let record = remote
        .update("products", "P1", &payload_from(&[("price", json!(10))]), Some(5))
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(record.version, 6);
}

#[tokio::test]
async fn stale_update_surfaces_the_conflict_class() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(PATCH).path("/products/P1");
            then.status(409).json_body(json!({
                "ok": false,
                "status": 409,
                "message": "version 5 is behind server version 6"
            }));
        })
        .await;

    let remote = remote_for(&server);
    let err = remote
        .update("products", "P1", &payload_from(&[("price", json!(10))]), Some(5))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::Conflict);
    let OutpostError::Remote(failure) = err else {
        panic!("expected remote failure");
    };
    assert_eq!(failure.status, 409);
    assert!(failure.message.contains("behind server version"));
}

#[tokio::test]
async fn body_status_overrides_the_http_line() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/materials/m-1");
            // A proxy reports 502, but the service's own verdict rides in the
            // body.
            then.status(502).json_body(json!({
                "ok": false,
                "status": 429,
                "message": "slow down",
                "retryAfter": 30
            }));
        })
        .await;

    let remote = remote_for(&server);
    let err = remote.get("materials", "m-1").await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::RateLimit);
    let OutpostError::Remote(failure) = err else {
        panic!("expected remote failure");
    };
    assert_eq!(failure.status, 429);
    assert_eq!(failure.retry_after, Some(30));
}

#[tokio::test]
async fn plain_text_failure_keeps_the_body_as_message() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(DELETE).path("/materials/m-1");
            then.status(500).body("upstream exploded");
        })
        .await;

    let remote = remote_for(&server);
    let err = remote.delete("materials", "m-1").await.unwrap_err();

    assert_eq!(err.class(), ErrorClass::Server);
    let OutpostError::Remote(failure) = err else {
        panic!("expected remote failure");
    };
    assert_eq!(failure.status, 500);
    assert!(failure.message.contains("upstream exploded"));
}

#[tokio::test]
async fn delete_unwraps_the_ok_envelope() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(DELETE).path("/materials/m-1");
            then.status(200).json_body(json!({"ok": true}));
        })
        .await;

    let remote = remote_for(&server);
    remote.delete("materials", "m-1").await.unwrap();
    mock.assert_async().await;
}

#[tokio::test]
async fn list_sends_pagination_and_filter_params() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET)
                .path("/materials")
                .query_param("page", "2")
                .query_param("perPage", "3")
                .query_param("name", "Cement");
            then.status(200).json_body(json!({
                "items": [
                    {"id": "m-4", "version": 1, "name": "Cement"}
                ],
                "pagination": {"page": 2, "perPage": 3, "total": 7, "hasMore": true}
            }));
        })
        .await;

    let remote = remote_for(&server);
    let mut query = ListQuery::paged(2, 3);
    query.filters.insert("name".to_string(), json!("Cement"));
    let page = remote.list("materials", &query).await.unwrap();

    mock.assert_async().await;
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, "m-4");
    assert_eq!(page.page, 2);
    assert_eq!(page.per_page, 3);
    assert_eq!(page.total, Some(7));
    assert!(page.has_more);
}

#[tokio::test]
async fn slow_responses_classify_as_timeout() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/materials/m-1");
            then.status(200)
                .json_body(json!({"ok": true, "id": "m-1", "version": 1}))
                .delay(Duration::from_millis(500));
        })
        .await;

    let config = RemoteConfig {
        base_url: Some(server.base_url()),
        token: None,
        client_name: Some("tester".to_string()),
    };
    let remote = HttpRemote::new(&config, Duration::from_millis(100)).unwrap();
    let err = remote.get("materials", "m-1").await.unwrap_err();

    assert!(matches!(err, OutpostError::Timeout(_)));
    assert_eq!(err.class(), ErrorClass::Timeout);
}

#[tokio::test]
async fn path_segments_are_percent_encoded() {
    let server = MockServer::start_async().await;
    let mock = server
        .mock_async(|when, then| {
            when.method(GET).path("/job%20sites/A%2F7");
            then.status(200)
                .json_body(json!({"ok": true, "id": "A/7", "version": 1}));
        })
        .await;

    let remote = remote_for(&server);
    let record = remote.get("job sites", "A/7").await.unwrap();

    mock.assert_async().await;
    assert_eq!(record.id, "A/7");
}

#[tokio::test]
async fn missing_base_url_is_a_config_error() {
    let config = RemoteConfig {
        base_url: None,
        token: None,
        client_name: None,
    };
    let err = HttpRemote::new(&config, Duration::from_secs(2)).unwrap_err();
    assert!(matches!(err, OutpostError::Config(_)));
}
