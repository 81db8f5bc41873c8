//! WebSocket close codes

use serde::{Deserialize, Serialize};

/// Gateway WebSocket close codes
///
/// Sent when the gateway closes a connection, to tell the client why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u16)]
pub enum CloseCode {
    /// Unknown error occurred
    UnknownError = 4000,
    /// Invalid opcode sent
    UnknownOpcode = 4001,
    /// Invalid payload encoding (JSON decode error)
    DecodeError = 4002,
    /// No pre-authenticated identity on the upgrade request
    NotAuthenticated = 4003,
    /// User already holds the maximum number of sessions
    ConnectionLimitExceeded = 4005,
    /// Connect event rejected by the rate limiter
    RateLimited = 4008,
    /// No answer to a liveness ping in time
    SessionTimeout = 4009,
    /// Frame larger than the configured maximum payload
    PayloadTooLarge = 4010,
    /// Outbound queue overflowed or closed
    SlowConsumer = 4011,
    /// Gateway is shutting down
    ServerShutdown = 4012,
}

impl CloseCode {
    /// Create a `CloseCode` from a raw u16 value
    #[must_use]
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            4000 => Some(Self::UnknownError),
            4001 => Some(Self::UnknownOpcode),
            4002 => Some(Self::DecodeError),
            4003 => Some(Self::NotAuthenticated),
            4005 => Some(Self::ConnectionLimitExceeded),
            4008 => Some(Self::RateLimited),
            4009 => Some(Self::SessionTimeout),
            4010 => Some(Self::PayloadTooLarge),
            4011 => Some(Self::SlowConsumer),
            4012 => Some(Self::ServerShutdown),
            _ => None,
        }
    }

    /// Get the raw u16 value
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Check if the client should attempt to reconnect after this close code
    #[must_use]
    pub const fn should_reconnect(self) -> bool {
        !matches!(self, Self::NotAuthenticated | Self::ConnectionLimitExceeded)
    }

    /// Get the description for this close code
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::UnknownError => "Unknown error occurred",
            Self::UnknownOpcode => "Invalid opcode sent",
            Self::DecodeError => "Invalid payload encoding",
            Self::NotAuthenticated => "Not authenticated",
            Self::ConnectionLimitExceeded => "Too many concurrent sessions",
            Self::RateLimited => "Rate limited",
            Self::SessionTimeout => "Session timeout",
            Self::PayloadTooLarge => "Payload too large",
            Self::SlowConsumer => "Outbound queue overflow",
            Self::ServerShutdown => "Server shutting down",
        }
    }
}

impl std::fmt::Display for CloseCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} ({}): {}", self, self.as_u16(), self.description())
    }
}

impl From<CloseCode> for u16 {
    fn from(code: CloseCode) -> Self {
        code.as_u16()
    }
}
