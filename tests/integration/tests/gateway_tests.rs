//! WebSocket gateway integration tests
//!
//! Every test runs against in-process gateways bound to ephemeral ports;
//! no external services are needed.
//!
//! Run with: cargo test -p integration-tests --test gateway_tests

use std::sync::Arc;
use std::time::Duration;

use courier_cache::{InMemoryBus, InMemoryHub};
use courier_common::EventType;
use courier_gateway::protocol::OpCode;
use integration_tests::{next_close, test_config, TestServer};
use serde_json::json;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, Error as WsError};

// ============================================================================
// Connection Lifecycle
// ============================================================================

#[tokio::test]
async fn test_hello_is_first_frame() {
    let server = TestServer::start().await.expect("Failed to start server");
    let client = server.connect("alice").await.expect("Failed to connect");

    let hello = client.hello.d.as_ref().expect("Hello carries a body");
    assert!(!client.session_id().is_empty());
    assert_eq!(hello["pingInterval"], 60_000);
    assert_eq!(hello["maxPayload"], 1_048_576);
    assert_eq!(server.router.registry().session_count(), 1);
}

#[tokio::test]
async fn test_identity_from_header() {
    let server = TestServer::start().await.expect("Failed to start server");

    let mut request = format!("ws://{}/gateway", server.addr)
        .into_client_request()
        .unwrap();
    request.headers_mut().insert("x-user-id", "carol".parse().unwrap());
    let (_stream, _) = connect_async(request).await.expect("Upgrade should succeed");

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(server.router.registry().is_local(&"carol".into()));
}

#[tokio::test]
async fn test_missing_identity_is_rejected() {
    let server = TestServer::start().await.expect("Failed to start server");

    let url = format!("ws://{}/gateway", server.addr);
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 401),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("upgrade without identity should fail"),
    }
}

#[tokio::test]
async fn test_sixth_session_is_closed_with_limit_code() {
    let server = TestServer::start().await.expect("Failed to start server");

    let mut clients = Vec::new();
    for _ in 0..5 {
        clients.push(server.connect("alice").await.expect("Failed to connect"));
    }

    let mut sixth = server.connect_raw("alice").await.expect("Upgrade should succeed");
    let code = next_close(&mut sixth).await.expect("Expected close frame");
    assert_eq!(code, 4005);

    // Existing sessions are untouched
    assert_eq!(server.router.registry().sessions_for(&"alice".into()).len(), 5);
}

#[tokio::test]
async fn test_disconnect_unregisters_session() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");
    client.stream.close(None).await.expect("Close should succeed");

    for _ in 0..50 {
        if server.router.registry().session_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(server.router.registry().session_count(), 0);
    assert!(server.router.registry().last_seen(&"alice".into()).is_some());
}

// ============================================================================
// Event Routing
// ============================================================================

#[tokio::test]
async fn test_event_reaches_every_session_of_target() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut bob_phone = server.connect("bob").await.expect("Failed to connect");
    let mut bob_laptop = server.connect("bob").await.expect("Failed to connect");
    let mut alice = server.connect("alice").await.expect("Failed to connect");

    alice
        .send_event(EventType::MessageSend, "bob", json!({"text": "hi"}))
        .await
        .unwrap();

    for client in [&mut bob_phone, &mut bob_laptop] {
        let frame = client.recv().await.expect("Expected dispatch");
        assert_eq!(frame.op, OpCode::Dispatch);
        assert_eq!(frame.t.as_deref(), Some("message-send"));
        assert_eq!(frame.s, Some(1));
        assert_eq!(frame.d, Some(json!({"text": "hi"})));
    }
}

#[tokio::test]
async fn test_sequence_numbers_follow_send_order() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut bob = server.connect("bob").await.expect("Failed to connect");
    let mut alice = server.connect("alice").await.expect("Failed to connect");

    for n in 0..5 {
        alice
            .send_event(EventType::TypingIndicator, "bob", json!({"n": n}))
            .await
            .unwrap();
    }

    for n in 0..5u64 {
        let frame = bob.recv().await.expect("Expected dispatch");
        assert_eq!(frame.s, Some(n + 1));
        assert_eq!(frame.d, Some(json!({"n": n})));
    }
}

#[tokio::test]
async fn test_undelivered_event_reports_error_to_sender() {
    let hub = InMemoryHub::new(64);
    let server = TestServer::start_with(test_config(), Arc::new(hub.bus()))
        .await
        .expect("Failed to start server");
    let mut alice = server.connect("alice").await.expect("Failed to connect");

    alice
        .send_event(EventType::MessageSend, "nobody", json!({}))
        .await
        .unwrap();

    let frame = alice.recv().await.expect("Expected error frame");
    assert_eq!(frame.op, OpCode::Error);
    assert_eq!(frame.t.as_deref(), Some("message-send"));
    assert_eq!(frame.d.unwrap()["code"], "UNDELIVERED");

    // Nothing was relayed for an offline user
    assert_eq!(hub.published_count(), 0);
}

#[tokio::test]
async fn test_rate_limited_event_reports_retry_hint() {
    let mut config = test_config();
    config.realtime.max_events_per_second = 2;
    config.realtime.rate_limit_burst = 2;
    let server = TestServer::start_with(config, Arc::new(InMemoryBus::standalone()))
        .await
        .expect("Failed to start server");

    let mut bob = server.connect("bob").await.expect("Failed to connect");
    let mut alice = server.connect("alice").await.expect("Failed to connect");

    for n in 0..3 {
        alice
            .send_event(EventType::MessageSend, "bob", json!({"n": n}))
            .await
            .unwrap();
    }

    let frame = alice.recv().await.expect("Expected error frame");
    assert_eq!(frame.op, OpCode::Error);
    let body = frame.d.unwrap();
    assert_eq!(body["code"], "RATE_LIMIT_EXCEEDED");
    assert!(body["retryAfterMs"].as_u64().unwrap() >= 1);

    // The first two got through
    assert_eq!(bob.recv().await.unwrap().s, Some(1));
    assert_eq!(bob.recv().await.unwrap().s, Some(2));
    assert_eq!(server.router.metrics().total_rejections(), 1);
}

#[tokio::test]
async fn test_relay_between_instances() {
    let hub = InMemoryHub::new(64);
    let first = TestServer::start_on_hub(&hub).await.expect("Failed to start server");
    let second = TestServer::start_on_hub(&hub).await.expect("Failed to start server");

    let mut bob = second.connect("bob").await.expect("Failed to connect");
    let mut alice = first.connect("alice").await.expect("Failed to connect");
    first.wait_reachable("bob").await.unwrap();

    alice
        .send_event(EventType::Notification, "bob", json!({"badge": 3}))
        .await
        .unwrap();

    let frame = bob.recv().await.expect("Expected relayed dispatch");
    assert_eq!(frame.op, OpCode::Dispatch);
    assert_eq!(frame.t.as_deref(), Some("notification"));
    assert_eq!(frame.d, Some(json!({"badge": 3})));
    assert_eq!(hub.published_count(), 1);
}

// ============================================================================
// Protocol Violations
// ============================================================================

#[tokio::test]
async fn test_malformed_json_closes_with_decode_error() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    client.send_text("{not json".to_string()).await.unwrap();
    assert_eq!(client.recv_close().await.unwrap(), 4002);
}

#[tokio::test]
async fn test_unknown_event_types_are_rejected_before_rate_limiting() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    for n in 0..20 {
        client
            .send_text(format!(r#"{{"op":3,"t":"x{n}","d":{{"target":"bob"}}}}"#))
            .await
            .unwrap();

        let frame = client.recv().await.expect("Expected error frame");
        assert_eq!(frame.op, OpCode::Error);
        assert_eq!(frame.d.unwrap()["code"], "UNKNOWN_EVENT_TYPE");
    }

    // Only the connect admission owns a bucket, and the session stays open
    assert_eq!(server.router.limiter().bucket_count(), 1);
    assert_eq!(server.router.registry().session_count(), 1);
}

#[tokio::test]
async fn test_unknown_opcode_closes_connection() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    // Dispatch is server-to-client only
    client
        .send_text(r#"{"op":0,"t":"message-send","s":1,"d":{}}"#.to_string())
        .await
        .unwrap();
    assert_eq!(client.recv_close().await.unwrap(), 4001);
}

#[tokio::test]
async fn test_oversized_frame_closes_with_payload_code() {
    let mut config = test_config();
    config.realtime.max_payload_bytes = 1024;
    let server = TestServer::start_with(config, Arc::new(InMemoryBus::standalone()))
        .await
        .expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    let filler = "x".repeat(2048);
    client
        .send_event(EventType::MessageSend, "bob", json!({ "text": filler }))
        .await
        .unwrap();
    assert_eq!(client.recv_close().await.unwrap(), 4010);
}

// ============================================================================
// Heartbeat
// ============================================================================

#[tokio::test]
async fn test_silent_session_is_evicted() {
    let mut config = test_config();
    config.realtime.ping_interval_ms = 100;
    config.realtime.ping_timeout_ms = 200;
    let server = TestServer::start_with(config, Arc::new(InMemoryBus::standalone()))
        .await
        .expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    let ping = client.recv().await.expect("Expected ping");
    assert_eq!(ping.op, OpCode::Ping);

    assert_eq!(client.recv_close().await.unwrap(), 4009);
    assert_eq!(server.router.registry().session_count(), 0);
}

#[tokio::test]
async fn test_answering_pings_keeps_session_alive() {
    let mut config = test_config();
    config.realtime.ping_interval_ms = 100;
    config.realtime.ping_timeout_ms = 200;
    let server = TestServer::start_with(config, Arc::new(InMemoryBus::standalone()))
        .await
        .expect("Failed to start server");
    let mut client = server.connect("alice").await.expect("Failed to connect");

    for _ in 0..5 {
        let ping = client.recv().await.expect("Expected ping");
        assert_eq!(ping.op, OpCode::Ping);
        client.send_pong().await.unwrap();
    }

    assert_eq!(server.router.registry().session_count(), 1);
}

// ============================================================================
// Shutdown
// ============================================================================

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::start().await.expect("Failed to start server");
    let mut alice = server.connect("alice").await.expect("Failed to connect");
    let mut bob = server.connect("bob").await.expect("Failed to connect");

    let router = Arc::clone(&server.router);
    let stopping = tokio::spawn(server.stop());

    assert_eq!(alice.recv_close().await.unwrap(), 4012);
    assert_eq!(bob.recv_close().await.unwrap(), 4012);

    stopping.await.unwrap().expect("Server should stop cleanly");
    assert_eq!(router.registry().session_count(), 0);
    assert!(!router.registry().is_accepting());
}
