//! Presence transitions
//!
//! A user is online while they hold at least one session on this instance.

use chrono::{DateTime, Utc};
use courier_common::{SessionId, UserId};

/// Online/offline transition emitted by the registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    /// First session for the user was registered
    Online {
        user_id: UserId,
        session_id: SessionId,
        at: DateTime<Utc>,
    },
    /// Last session for the user was removed
    Offline { user_id: UserId, at: DateTime<Utc> },
}

impl PresenceEvent {
    /// The user this transition concerns
    #[must_use]
    pub fn user_id(&self) -> &UserId {
        match self {
            Self::Online { user_id, .. } | Self::Offline { user_id, .. } => user_id,
        }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        matches!(self, Self::Online { .. })
    }
}
