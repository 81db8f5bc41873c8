//! Gateway error types

use crate::protocol::{CloseCode, ErrorPayload};
use courier_cache::BusError;
use courier_common::{EventType, SessionId, UnknownEventType, UserId};
use thiserror::Error;

/// Errors surfaced by the realtime core
///
/// Admission failures are recoverable and reported to the caller; transport
/// failures cost exactly one session.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// User already holds the maximum number of concurrent sessions
    #[error("User {user_id} already holds {limit} sessions")]
    ConnectionLimitExceeded { user_id: UserId, limit: usize },

    /// Event rejected by the token bucket for (user, event type)
    #[error("Rate limit exceeded for {event_type}")]
    RateLimitExceeded {
        event_type: EventType,
        retry_after_ms: u64,
    },

    /// Relay publish did not complete in time
    #[error("Relay publish timed out after {timeout_ms}ms")]
    DeliveryTimeout { timeout_ms: u64 },

    /// Local write to a session failed; the session has been torn down
    #[error("Transport write failed for session {session_id}")]
    TransportWriteFailure { session_id: SessionId },

    /// Event name outside the known set; never reaches the rate limiter
    #[error(transparent)]
    UnknownEventType(#[from] UnknownEventType),

    /// Registry no longer accepts sessions
    #[error("Gateway is shutting down")]
    ShuttingDown,

    /// Relay backend failure
    #[error("Relay error: {0}")]
    Relay(#[from] BusError),

    /// Relay envelope could not be encoded or decoded
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),
}

impl GatewayError {
    /// Machine-readable reason code
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionLimitExceeded { .. } => "CONNECTION_LIMIT_EXCEEDED",
            Self::RateLimitExceeded { .. } => "RATE_LIMIT_EXCEEDED",
            Self::DeliveryTimeout { .. } => "DELIVERY_TIMEOUT",
            Self::TransportWriteFailure { .. } => "TRANSPORT_WRITE_FAILURE",
            Self::UnknownEventType(_) => "UNKNOWN_EVENT_TYPE",
            Self::ShuttingDown => "SHUTTING_DOWN",
            Self::Relay(_) => "RELAY_ERROR",
            Self::Codec(_) => "CODEC_ERROR",
        }
    }

    /// Close code to use when this error ends a socket
    #[must_use]
    pub fn close_code(&self) -> CloseCode {
        match self {
            Self::ConnectionLimitExceeded { .. } => CloseCode::ConnectionLimitExceeded,
            Self::RateLimitExceeded { .. } => CloseCode::RateLimited,
            Self::TransportWriteFailure { .. } => CloseCode::SlowConsumer,
            Self::ShuttingDown => CloseCode::ServerShutdown,
            Self::DeliveryTimeout { .. } | Self::Relay(_) => CloseCode::UnknownError,
            Self::UnknownEventType(_) | Self::Codec(_) => CloseCode::DecodeError,
        }
    }

    /// Error frame body reported back to a sender
    #[must_use]
    pub fn to_payload(&self) -> ErrorPayload {
        ErrorPayload {
            code: self.code().to_string(),
            message: self.to_string(),
            retry_after_ms: match self {
                Self::RateLimitExceeded { retry_after_ms, .. } => Some(*retry_after_ms),
                _ => None,
            },
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
