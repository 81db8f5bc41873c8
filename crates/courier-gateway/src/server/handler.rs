//! WebSocket handler
//!
//! One upgraded socket becomes one session. The socket is split: a reader
//! task handles inbound frames, and a writer task is the only consumer of
//! the session's outbound queue and the only writer to the sink.

use crate::connection::{OutboundFrame, OutboundReceiver, TransportHandle, TransportKind};
use crate::error::GatewayError;
use crate::protocol::{ClientEventError, CloseCode, ErrorPayload, GatewayMessage, HelloPayload, OpCode};
use crate::router::DeliveryResult;
use crate::server::GatewayState;
use axum::{
    extract::{
        ws::{CloseFrame, Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use courier_common::{ErrorResponse, EventType, SessionId, UserId};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::time::Duration;

/// Header carrying the identity established by the upstream auth layer
pub const USER_ID_HEADER: &str = "x-user-id";

/// Frames larger than this many times the payload limit are refused by the
/// codec before they are buffered
const CODEC_CEILING_FACTOR: usize = 4;

/// Query parameters accepted on the upgrade request
#[derive(Debug, Default, Deserialize)]
pub struct GatewayQuery {
    pub user_id: Option<String>,
}

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// WebSocket gateway handler
pub async fn gateway_handler(
    State(state): State<GatewayState>,
    Query(query): Query<GatewayQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user_id) = identity(&headers, &query) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::new("NOT_AUTHENTICATED", "Missing user identity")),
        )
            .into_response();
    };

    let ceiling = state
        .config()
        .realtime
        .max_payload_bytes
        .saturating_mul(CODEC_CEILING_FACTOR);

    ws.max_message_size(ceiling)
        .on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

/// Pre-authenticated user id from the header, falling back to the query string
fn identity(headers: &HeaderMap, query: &GatewayQuery) -> Option<UserId> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| query.user_id.clone())
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty())
        .map(UserId::new)
}

/// Handle an upgraded WebSocket connection
async fn handle_socket(state: GatewayState, user_id: UserId, mut socket: WebSocket) {
    let router = state.router();
    let registry = router.registry();
    let realtime = &state.config().realtime;

    let session_id = SessionId::generate();
    let (handle, rx) = TransportHandle::channel(realtime.outbound_queue_size);

    // Connection limit first; only an accepted session spends a connect token
    if let Err(e) = registry.register(user_id.clone(), session_id.clone(), handle, TransportKind::WebSocket) {
        tracing::info!(user_id = %user_id, reason = %e, "Connection refused");
        send_close(&mut socket, e.close_code()).await;
        return;
    }

    if let Err(e) = router.admit(&user_id, &EventType::Connect) {
        tracing::info!(user_id = %user_id, reason = %e, "Connect rate limited");
        registry.unregister(&session_id);
        send_close(&mut socket, e.close_code()).await;
        return;
    }

    // Hello goes out before the writer starts, so it is always the first frame
    let hello = GatewayMessage::hello(&HelloPayload {
        session_id: session_id.to_string(),
        ping_interval: realtime.ping_interval_ms,
        ping_timeout: realtime.ping_timeout_ms,
        max_payload: realtime.max_payload_bytes,
    });
    let connect_timeout = Duration::from_millis(realtime.connect_timeout_ms);
    if !send_message(&mut socket, &hello, connect_timeout).await {
        tracing::warn!(session_id = %session_id, "Failed to send Hello message");
        registry.unregister(&session_id);
        return;
    }

    tracing::info!(
        session_id = %session_id,
        user_id = %user_id,
        "WebSocket connection established"
    );

    let (sink, stream) = socket.split();
    let mut send_task = tokio::spawn(write_loop(sink, rx, session_id.clone()));
    let mut recv_task = tokio::spawn(read_loop(
        state.clone(),
        stream,
        user_id.clone(),
        session_id.clone(),
    ));

    // Wait for either side to finish, then stop the other
    tokio::select! {
        result = &mut recv_task => {
            if let Ok(Some(close_code)) = result {
                tracing::debug!(
                    session_id = %session_id,
                    close_code = ?close_code,
                    "Receive task ended with close code"
                );
                // The writer sends the close frame, then ends
                registry.close(&session_id, close_code);
            } else {
                registry.unregister(&session_id);
            }
            let _ = send_task.await;
        }
        _ = &mut send_task => {
            tracing::debug!(session_id = %session_id, "Send task ended");
            recv_task.abort();
        }
    }

    // Idempotent; a no-op when eviction or shutdown already removed it
    registry.unregister(&session_id);
    tracing::info!(session_id = %session_id, user_id = %user_id, "WebSocket connection closed");
}

/// Drain the outbound queue into the socket
///
/// A close request is written as soon as it is made, ahead of queued frames.
async fn write_loop(mut sink: WsSink, mut rx: OutboundReceiver, session_id: SessionId) {
    while let Some(frame) = rx.recv().await {
        match frame {
            OutboundFrame::Message(message) => {
                let json = match message.to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!(session_id = %session_id, error = %e, "Failed to encode frame");
                        continue;
                    }
                };
                if sink.send(Message::Text(json.into())).await.is_err() {
                    tracing::warn!(session_id = %session_id, "Failed to send message to WebSocket");
                    return;
                }
            }
            OutboundFrame::Close(code) => {
                let _ = sink.send(close_message(code)).await;
                return;
            }
        }
    }

    // Registry dropped the session without a close code
    let _ = sink.close().await;
}

/// Handle inbound frames until the client leaves or breaks protocol
async fn read_loop(
    state: GatewayState,
    mut stream: WsStream,
    user_id: UserId,
    session_id: SessionId,
) -> Option<CloseCode> {
    let max_payload = state.config().realtime.max_payload_bytes;
    let registry = state.router().registry();

    while let Some(msg) = stream.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(_)) => {
                tracing::debug!(session_id = %session_id, "Binary messages not supported");
                return Some(CloseCode::DecodeError);
            }
            Ok(Message::Ping(_) | Message::Pong(_)) => {
                // Transport-level keepalives count as activity
                registry.touch(&session_id);
                continue;
            }
            Ok(Message::Close(_)) => {
                tracing::debug!(session_id = %session_id, "Client closed connection");
                return None;
            }
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "WebSocket error");
                return None;
            }
        };

        registry.touch(&session_id);

        if text.len() > max_payload {
            tracing::debug!(
                session_id = %session_id,
                size = text.len(),
                max_payload,
                "Frame exceeds payload limit"
            );
            return Some(CloseCode::PayloadTooLarge);
        }

        let message = match GatewayMessage::from_json(&text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(session_id = %session_id, error = %e, "Failed to parse message");
                return Some(CloseCode::DecodeError);
            }
        };

        tracing::trace!(session_id = %session_id, op = %message.op, "Received message");

        match message.op {
            OpCode::Pong => {}
            OpCode::Event => {
                let (event_type, event) = match message.as_client_event() {
                    Ok(parsed) => parsed,
                    Err(ClientEventError::UnknownType(e)) => {
                        // Rejected before admission so unknown names never get a bucket
                        tracing::debug!(session_id = %session_id, event_type = %e.0, "Unknown event type");
                        let payload = GatewayError::from(e).to_payload();
                        let _ = registry.send_to_session(&session_id, GatewayMessage::error(None, &payload));
                        continue;
                    }
                    Err(e) => {
                        tracing::debug!(session_id = %session_id, error = %e, "Malformed event");
                        return Some(CloseCode::DecodeError);
                    }
                };
                handle_client_event(&state, &user_id, &session_id, event_type, event.target, event.payload).await;
            }
            _ => {
                tracing::debug!(session_id = %session_id, op = %message.op, "Unexpected client opcode");
                return Some(CloseCode::UnknownOpcode);
            }
        }
    }

    None
}

/// Route a client-originated event, answering the sender on failure
async fn handle_client_event(
    state: &GatewayState,
    sender: &UserId,
    session_id: &SessionId,
    event_type: EventType,
    target: UserId,
    payload: serde_json::Value,
) {
    let router = state.router();
    let reply = match router.dispatch(sender, event_type, &target, payload).await {
        Ok(DeliveryResult::Undelivered) => Some(ErrorPayload {
            code: DeliveryResult::UNDELIVERED_CODE.to_string(),
            message: format!("User {target} has no active session"),
            retry_after_ms: None,
        }),
        Ok(_) => None,
        Err(e) => Some(e.to_payload()),
    };

    if let Some(payload) = reply {
        // A failed reply already tore the session down
        let _ = router
            .registry()
            .send_to_session(session_id, GatewayMessage::error(Some(&event_type), &payload));
    }
}

async fn send_message(socket: &mut WebSocket, message: &GatewayMessage, timeout: Duration) -> bool {
    let Ok(json) = message.to_json() else {
        return false;
    };
    matches!(
        tokio::time::timeout(timeout, socket.send(Message::Text(json.into()))).await,
        Ok(Ok(()))
    )
}

async fn send_close(socket: &mut WebSocket, code: CloseCode) {
    let _ = socket.send(close_message(code)).await;
}

fn close_message(code: CloseCode) -> Message {
    let (code, reason) = GatewayMessage::close_frame(code);
    Message::Close(Some(CloseFrame {
        code,
        reason: reason.into(),
    }))
}
