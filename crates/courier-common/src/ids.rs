//! Identifier and event-kind types shared across crates.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

string_id!(
    /// Pre-authenticated user identity handed to the gateway
    UserId
);

string_id!(
    /// Identifier of one physical connection
    SessionId
);

string_id!(
    /// Identifier of one gateway process among its peers
    InstanceId
);

impl SessionId {
    /// Generate a fresh session ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl InstanceId {
    /// Generate a fresh instance ID
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Kind of realtime event
///
/// Each kind gets its own rate-limit bucket, so a burst of cheap events
/// (typing) cannot starve expensive ones (message sends). The set is closed:
/// a name outside it is rejected at the edge and never reaches the limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    MessageSend,
    TypingIndicator,
    ReadReceipt,
    Notification,
    PresenceUpdate,
    Connect,
}

impl EventType {
    /// Every event kind, in wire-name order of the protocol table
    pub const ALL: [Self; 6] = [
        Self::MessageSend,
        Self::TypingIndicator,
        Self::ReadReceipt,
        Self::Notification,
        Self::PresenceUpdate,
        Self::Connect,
    ];

    /// Wire name of the event kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageSend => "message-send",
            Self::TypingIndicator => "typing-indicator",
            Self::ReadReceipt => "read-receipt",
            Self::Notification => "notification",
            Self::PresenceUpdate => "presence-update",
            Self::Connect => "connect",
        }
    }
}

/// Event name outside the known set
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown event type '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|event_type| event_type.as_str() == s)
            .ok_or_else(|| UnknownEventType(s.to_string()))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
