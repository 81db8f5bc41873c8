//! HTTP endpoint integration tests
//!
//! Run with: cargo test -p integration-tests --test http_tests

use std::sync::Arc;
use std::time::Duration;

use courier_cache::InMemoryBus;
use courier_common::EventType;
use courier_gateway::protocol::OpCode;
use integration_tests::{assert_json, assert_status, test_config, TestServer};
use reqwest::StatusCode;
use serde_json::{json, Value};

// ============================================================================
// Health
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await.expect("Failed to start server");
    let response = server.get("/health").await.expect("Request failed");
    assert_status(response, StatusCode::OK).await.unwrap();
}

// ============================================================================
// Metrics
// ============================================================================

#[tokio::test]
async fn test_metrics_document_shape() {
    let server = TestServer::start().await.expect("Failed to start server");
    let _alice = server.connect("alice").await.expect("Failed to connect");
    let _bob = server.connect("bob").await.expect("Failed to connect");

    let response = server.get("/metrics").await.expect("Request failed");
    let body: Value = assert_json(response, StatusCode::OK).await.unwrap();

    assert_eq!(body["connections"]["current"], 2);
    assert_eq!(body["connections"]["peak"], 2);
    assert!(body["performance"]["eventsPerSecond"].is_number());
    assert!(body["performance"]["averageLatencyMs"].is_number());
    assert!(body["server"]["uptimeSeconds"].is_number());
    assert!(body["server"]["startedAt"].is_string());
}

#[tokio::test]
async fn test_metrics_count_processed_events() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut bob = server.connect("bob").await.expect("Failed to connect");
    let mut alice = server.connect("alice").await.expect("Failed to connect");

    for n in 0..3 {
        alice
            .send_event(EventType::MessageSend, "bob", json!({"n": n}))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        assert_eq!(bob.recv().await.unwrap().op, OpCode::Dispatch);
    }
    // Latency is recorded once routing returns, just after delivery
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = server.get("/metrics").await.expect("Request failed");
    let body: Value = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["performance"]["totalEventsProcessed"], 3);
    assert_eq!(body["performance"]["rateLimitRejections"], 0);
}

#[tokio::test]
async fn test_metrics_history_fills_over_time() {
    let server = TestServer::start().await.expect("Failed to start server");
    let _alice = server.connect("alice").await.expect("Failed to connect");

    // Snapshots are taken every 100ms in the test configuration
    tokio::time::sleep(Duration::from_millis(450)).await;

    let response = server.get("/metrics/history").await.expect("Request failed");
    let body: Value = assert_json(response, StatusCode::OK).await.unwrap();

    assert_eq!(body["windowSizeMs"], 1_000);
    assert_eq!(body["snapshotIntervalMs"], 100);
    let snapshots = body["snapshots"].as_array().expect("snapshots array");
    assert!(snapshots.len() >= 2, "got {} snapshots", snapshots.len());
    assert!(snapshots.len() <= 10);
    assert_eq!(snapshots.last().unwrap()["connectedClients"], 1);
}

// ============================================================================
// Internal Dispatch
// ============================================================================

#[tokio::test]
async fn test_dispatch_endpoint_delivers() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut bob = server.connect("bob").await.expect("Failed to connect");

    let response = server
        .post(
            "/internal/dispatch",
            &json!({
                "sender": "billing-service",
                "eventType": "notification",
                "target": "bob",
                "payload": {"invoice": "inv-1"}
            }),
        )
        .await
        .expect("Request failed");
    let body: Value = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["status"], "delivered");
    assert_eq!(body["sessions"], 1);

    let frame = bob.recv().await.expect("Expected dispatch");
    assert_eq!(frame.t.as_deref(), Some("notification"));
    assert_eq!(frame.d, Some(json!({"invoice": "inv-1"})));
}

#[tokio::test]
async fn test_dispatch_endpoint_reports_undelivered() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .post(
            "/internal/dispatch",
            &json!({"sender": "svc", "eventType": "presence-update", "target": "ghost"}),
        )
        .await
        .expect("Request failed");
    let body: Value = assert_json(response, StatusCode::OK).await.unwrap();
    assert_eq!(body["status"], "undelivered");
}

#[tokio::test]
async fn test_dispatch_endpoint_rejects_unknown_event_type() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server
        .post(
            "/internal/dispatch",
            &json!({"sender": "svc", "eventType": "message-send-7", "target": "bob"}),
        )
        .await
        .expect("Request failed");
    let body: Value = assert_json(response, StatusCode::BAD_REQUEST).await.unwrap();
    assert_eq!(body["code"], "UNKNOWN_EVENT_TYPE");
    assert_eq!(server.router.limiter().bucket_count(), 0);
}

#[tokio::test]
async fn test_dispatch_endpoint_rate_limits() {
    let mut config = test_config();
    config.realtime.max_events_per_second = 1;
    config.realtime.rate_limit_burst = 1;
    let server = TestServer::start_with(config, Arc::new(InMemoryBus::standalone()))
        .await
        .expect("Failed to start server");

    let request = json!({"sender": "svc", "eventType": "notification", "target": "ghost"});
    let first = server.post("/internal/dispatch", &request).await.unwrap();
    assert_status(first, StatusCode::OK).await.unwrap();

    let second = server.post("/internal/dispatch", &request).await.unwrap();
    let body: Value = assert_json(second, StatusCode::TOO_MANY_REQUESTS).await.unwrap();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["details"]["retryAfterMs"].as_u64().unwrap() >= 1);
}
