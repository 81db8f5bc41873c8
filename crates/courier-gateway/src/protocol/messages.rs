//! Gateway message format
//!
//! Defines the structure for all WebSocket frames.

use super::{ClientEventPayload, CloseCode, ErrorPayload, HelloPayload, OpCode};
use courier_common::{EventType, UnknownEventType};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Why a frame could not be read as a client Event
#[derive(Debug, Error)]
pub enum ClientEventError {
    #[error("Frame is not an Event")]
    NotAnEvent,

    #[error("Event frame has no type")]
    MissingType,

    /// Well-formed frame naming an event type outside the known set
    #[error(transparent)]
    UnknownType(#[from] UnknownEventType),

    #[error("Malformed event body: {0}")]
    MalformedBody(#[source] serde_json::Error),
}

/// Gateway message format
///
/// All frames sent over the WebSocket connection follow this format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayMessage {
    /// Operation code
    pub op: OpCode,

    /// Event type (Dispatch, Event, and Error frames)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,

    /// Per-session sequence number (Dispatch only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,

    /// Frame data
    #[serde(skip_serializing_if = "Option::is_none")]
    pub d: Option<Value>,
}

impl GatewayMessage {
    // === Server Messages ===

    /// Create a Dispatch message (op=0)
    #[must_use]
    pub fn dispatch(event_type: &EventType, sequence: u64, data: Value) -> Self {
        Self {
            op: OpCode::Dispatch,
            t: Some(event_type.to_string()),
            s: Some(sequence),
            d: Some(data),
        }
    }

    /// Create a Ping message (op=1)
    #[must_use]
    pub fn ping() -> Self {
        Self {
            op: OpCode::Ping,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Create a Hello message (op=10)
    #[must_use]
    pub fn hello(payload: &HelloPayload) -> Self {
        Self {
            op: OpCode::Hello,
            t: None,
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Create an Error message (op=9), tagged with the event type it concerns
    #[must_use]
    pub fn error(event_type: Option<&EventType>, payload: &ErrorPayload) -> Self {
        Self {
            op: OpCode::Error,
            t: event_type.map(ToString::to_string),
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    // === Client Messages ===

    /// Create a Pong message (op=2)
    #[must_use]
    pub fn pong() -> Self {
        Self {
            op: OpCode::Pong,
            t: None,
            s: None,
            d: None,
        }
    }

    /// Create an Event message (op=3)
    #[must_use]
    pub fn event(event_type: &EventType, payload: &ClientEventPayload) -> Self {
        Self {
            op: OpCode::Event,
            t: Some(event_type.to_string()),
            s: None,
            d: serde_json::to_value(payload).ok(),
        }
    }

    /// Parse as a client Event (op=3)
    ///
    /// The event type is checked before the body so an unknown name is
    /// reported as such even when the body is also bad.
    pub fn as_client_event(&self) -> Result<(EventType, ClientEventPayload), ClientEventError> {
        if self.op != OpCode::Event {
            return Err(ClientEventError::NotAnEvent);
        }
        let event_type: EventType = self.t.as_deref().ok_or(ClientEventError::MissingType)?.parse()?;
        let body = self.d.clone().unwrap_or(Value::Null);
        let payload = serde_json::from_value(body).map_err(ClientEventError::MalformedBody)?;
        Ok((event_type, payload))
    }

    // === Utilities ===

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Close frame code and reason text
    #[must_use]
    pub fn close_frame(code: CloseCode) -> (u16, &'static str) {
        (code.as_u16(), code.description())
    }
}

impl std::fmt::Display for GatewayMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (&self.t, self.s) {
            (Some(t), Some(s)) => write!(f, "GatewayMessage(op={}, t={t}, s={s})", self.op),
            (Some(t), None) => write!(f, "GatewayMessage(op={}, t={t})", self.op),
            _ => write!(f, "GatewayMessage(op={})", self.op),
        }
    }
}
