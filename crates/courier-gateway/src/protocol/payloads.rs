//! Frame payload definitions

use courier_common::UserId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
///
/// Sent by the server immediately after the session is registered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HelloPayload {
    pub session_id: String,
    /// Silence after which the server pings, in milliseconds
    pub ping_interval: u64,
    /// Time allowed to answer a ping, in milliseconds
    pub ping_timeout: u64,
    /// Largest accepted frame, in bytes
    pub max_payload: usize,
}

/// Payload for op 3 (Event)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientEventPayload {
    pub target: UserId,
    #[serde(default)]
    pub payload: Value,
}

/// Payload for op 9 (Error)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Machine-readable reason, e.g. `RATE_LIMIT_EXCEEDED`
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}
