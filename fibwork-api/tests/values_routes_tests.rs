//! Router-level tests for the values endpoints, driven with `oneshot`
//! against in-memory stores.

use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, StatusCode},
    response::Response,
    Router,
};
use fibwork_api::jobs::{relay_once, spawn_embedded_worker, OutboxRelayMetrics};
use fibwork_api::{create_router, ApiConfig, AppState, DispatchMode};
use fibwork_test_utils::fixtures::{memory_stores, wait_for_value, MemoryStores};
use fibwork_test_utils::{
    EventChannel, FailingLedger, FailingResultCache, Ledger, RecordingEventChannel, ResultCache,
    PLACEHOLDER,
};
use fibwork_worker::WorkerConfig;
use serde_json::{json, Value};
use tokio::sync::watch;
use tower::ServiceExt;

// ============================================================================
// HELPERS
// ============================================================================

fn app_with(
    cache: Arc<dyn ResultCache>,
    ledger: Arc<dyn Ledger>,
    channel: Arc<dyn EventChannel>,
    config: ApiConfig,
) -> Router {
    create_router(AppState::new(cache, ledger, channel, config))
}

fn app(stores: &MemoryStores) -> Router {
    app_with(
        stores.cache.clone(),
        stores.ledger.clone(),
        stores.channel.clone(),
        ApiConfig::default(),
    )
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response: Response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

fn post_raw(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/values")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post(body: Value) -> Request<Body> {
    post_raw(&body.to_string())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

// ============================================================================
// SUBMISSION
// ============================================================================

#[tokio::test]
async fn submit_writes_placeholder_and_ledger_entry() {
    let stores = memory_stores();
    let app = app(&stores);

    let (status, body) = send(&app, post(json!({ "index": 7 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body, json!({ "working": true, "index": 7 }));

    let (status, current) = send(&app, get("/values/current")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(current, json!({ "7": PLACEHOLDER }));

    let (_, seen) = send(&app, get("/values/all")).await;
    assert_eq!(seen.as_array().map(Vec::len), Some(1));
    assert_eq!(seen[0]["number"], 7);
    assert!(seen[0]["created_at"].is_string());
}

#[tokio::test]
async fn numeric_strings_are_accepted() {
    let stores = memory_stores();
    let app = app(&stores);

    let (status, body) = send(&app, post(json!({ "index": " 12 " }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["index"], 12);
}

#[tokio::test]
async fn duplicate_submission_keeps_one_ledger_entry() {
    let stores = memory_stores();
    let app = app(&stores);

    for _ in 0..2 {
        let (status, _) = send(&app, post(json!({ "index": 5 }))).await;
        assert_eq!(status, StatusCode::CREATED);
    }

    let entries = stores.ledger.list_ordered().await.unwrap();
    assert_eq!(entries.len(), 1);
    let current = stores.cache.get_all().await.unwrap();
    assert_eq!(current.len(), 1);
}

#[tokio::test]
async fn seen_indexes_are_sorted_ascending() {
    let stores = memory_stores();
    let app = app(&stores);

    for n in [30, 2, 17, 0, 9] {
        send(&app, post(json!({ "index": n }))).await;
    }

    let (_, seen) = send(&app, get("/values/all")).await;
    let numbers: Vec<u64> = seen
        .as_array()
        .unwrap()
        .iter()
        .map(|row| row["number"].as_u64().unwrap())
        .collect();
    assert_eq!(numbers, vec![0, 2, 9, 17, 30]);
}

#[tokio::test]
async fn empty_cache_is_an_empty_object() {
    let stores = memory_stores();
    let (status, body) = send(&app(&stores), get("/values/current")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({}));
}

// ============================================================================
// VALIDATION
// ============================================================================

#[tokio::test]
async fn rejected_submissions_use_distinct_codes() {
    let stores = memory_stores();
    let app = app(&stores);

    let cases = [
        (json!({}), StatusCode::BAD_REQUEST, "MISSING_INDEX"),
        (json!({ "index": null }), StatusCode::BAD_REQUEST, "MISSING_INDEX"),
        (json!({ "index": "" }), StatusCode::BAD_REQUEST, "MISSING_INDEX"),
        (json!({ "index": "abc" }), StatusCode::BAD_REQUEST, "MALFORMED_INDEX"),
        (json!({ "index": -1 }), StatusCode::UNPROCESSABLE_ENTITY, "INDEX_TOO_SMALL"),
        (json!({ "index": 41 }), StatusCode::UNPROCESSABLE_ENTITY, "INDEX_TOO_LARGE"),
        (json!({ "index": "3.5" }), StatusCode::BAD_REQUEST, "NOT_AN_INTEGER"),
    ];

    for (body, expected_status, expected_code) in cases {
        let (status, error) = send(&app, post(body.clone())).await;
        assert_eq!(status, expected_status, "body {body}");
        assert_eq!(error["code"], expected_code, "body {body}");
        assert!(error["message"].is_string());
    }

    // Nothing reached the stores.
    assert!(stores.cache.get_all().await.unwrap().is_empty());
    assert!(stores.ledger.list_ordered().await.unwrap().is_empty());
}

#[tokio::test]
async fn empty_and_invalid_bodies() {
    let stores = memory_stores();
    let app = app(&stores);

    let (status, error) = send(&app, post_raw("")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "MISSING_INDEX");

    let (status, error) = send(&app, post_raw("{\"index\": ")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "INVALID_INPUT");
}

// ============================================================================
// STORE FAILURES
// ============================================================================

#[tokio::test]
async fn publish_failure_still_accepts() {
    let stores = memory_stores();
    let channel = Arc::new(RecordingEventChannel::new());
    channel.fail_next(1);
    let app = app_with(
        stores.cache.clone(),
        stores.ledger.clone(),
        channel.clone(),
        ApiConfig::default(),
    );

    let (status, _) = send(&app, post(json!({ "index": 4 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(channel.published().is_empty());
    assert_eq!(stores.ledger.list_ordered().await.unwrap().len(), 1);
}

#[tokio::test]
async fn cache_failure_is_a_server_error() {
    let stores = memory_stores();
    let app = app_with(
        Arc::new(FailingResultCache::default()),
        stores.ledger.clone(),
        stores.channel.clone(),
        ApiConfig::default(),
    );

    let (status, error) = send(&app, get("/values/current")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["code"], "SERVICE_UNAVAILABLE");

    let (status, _) = send(&app, post(json!({ "index": 3 }))).await;
    assert!(status.is_server_error());
    assert!(stores.ledger.list_ordered().await.unwrap().is_empty());
}

#[tokio::test]
async fn pool_exhaustion_is_503() {
    let stores = memory_stores();
    let app = app_with(
        stores.cache.clone(),
        Arc::new(FailingLedger::pool_exhausted()),
        stores.channel.clone(),
        ApiConfig::default(),
    );

    let (status, error) = send(&app, get("/values/all")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["code"], "CONNECTION_POOL_EXHAUSTED");
}

#[tokio::test]
async fn readiness_reflects_store_health() {
    let stores = memory_stores();
    let (status, body) = send(&app(&stores), get("/health/ready")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["details"]["cache"]["backend"], "memory");

    let broken = app_with(
        stores.cache.clone(),
        Arc::new(FailingLedger::default()),
        stores.channel.clone(),
        ApiConfig::default(),
    );
    let (status, body) = send(&broken, get("/health/ready")).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["details"]["ledger"]["status"], "unhealthy");
}

// ============================================================================
// DISPATCH
// ============================================================================

#[tokio::test]
async fn outbox_mode_leaves_job_for_the_relay() {
    let stores = memory_stores();
    let channel = Arc::new(RecordingEventChannel::new());
    let config = ApiConfig {
        dispatch_mode: DispatchMode::Outbox,
        ..ApiConfig::default()
    };
    let app = app_with(
        stores.cache.clone(),
        stores.ledger.clone(),
        channel.clone(),
        config,
    );

    let (status, _) = send(&app, post(json!({ "index": 6 }))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert!(channel.published().is_empty());
    assert_eq!(stores.ledger.pending_jobs(10).await.unwrap().len(), 1);

    let metrics = OutboxRelayMetrics::new();
    let relayed = relay_once(
        stores.ledger.as_ref(),
        channel.as_ref(),
        "insert",
        10,
        &metrics,
    )
    .await;
    assert_eq!(relayed, 1);
    assert_eq!(
        channel.published(),
        vec![("insert".to_string(), "6".to_string())]
    );
    assert!(stores.ledger.pending_jobs(10).await.unwrap().is_empty());
}

#[tokio::test]
async fn placeholder_is_replaced_by_the_computed_value() {
    let stores = memory_stores();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = spawn_embedded_worker(
        stores.cache.clone(),
        stores.channel.clone(),
        WorkerConfig::default(),
        shutdown_rx,
    )
    .await
    .unwrap();
    let app = app(&stores);

    let (status, _) = send(&app, post(json!({ "index": 10 }))).await;
    assert_eq!(status, StatusCode::CREATED);

    assert!(wait_for_value(stores.cache.as_ref(), "10", "89", Duration::from_secs(2)).await);
    let (_, current) = send(&app, get("/values/current")).await;
    assert_eq!(current, json!({ "10": "89" }));

    shutdown_tx.send(true).unwrap();
    let snapshot = worker.run.await.unwrap().unwrap();
    assert_eq!(snapshot.computed, 1);
}
