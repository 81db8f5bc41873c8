//! Per-session liveness state machine
//!
//! `Alive -> AwaitingPong` after `ping_interval` without activity,
//! `AwaitingPong -> Alive` on any inbound frame, and `AwaitingPong -> evicted`
//! once `ping_timeout` passes without one. Eviction is terminal and handled
//! by removing the session, so it has no variant here.

use std::time::Duration;
use tokio::time::Instant;

/// Heartbeat phase of one session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatState {
    Alive,
    AwaitingPong { pinged_at: Instant },
}

/// Activity clock plus heartbeat phase
#[derive(Debug, Clone, Copy)]
pub struct Liveness {
    last_activity: Instant,
    state: HeartbeatState,
}

impl Liveness {
    #[must_use]
    pub fn new(now: Instant) -> Self {
        Self {
            last_activity: now,
            state: HeartbeatState::Alive,
        }
    }

    #[must_use]
    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    #[must_use]
    pub fn state(&self) -> HeartbeatState {
        self.state
    }

    /// Inbound activity (any frame, pongs included)
    pub fn record_activity(&mut self, now: Instant) {
        self.last_activity = now;
        self.state = HeartbeatState::Alive;
    }

    /// Move to `AwaitingPong` if alive and idle for at least `interval`
    ///
    /// Returns true when a ping should be sent.
    pub fn try_ping(&mut self, now: Instant, interval: Duration) -> bool {
        match self.state {
            HeartbeatState::Alive if now.duration_since(self.last_activity) >= interval => {
                self.state = HeartbeatState::AwaitingPong { pinged_at: now };
                true
            }
            _ => false,
        }
    }

    /// Whether a ping has gone unanswered for at least `timeout`
    #[must_use]
    pub fn is_expired(&self, now: Instant, timeout: Duration) -> bool {
        match self.state {
            HeartbeatState::AwaitingPong { pinged_at } => now.duration_since(pinged_at) >= timeout,
            HeartbeatState::Alive => false,
        }
    }
}
