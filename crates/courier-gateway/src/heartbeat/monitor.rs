//! Heartbeat monitor
//!
//! Two sweeps over the registry: a ping sweep every `ping_interval` that
//! pings idle sessions, and an eviction sweep every `ping_timeout` that
//! closes sessions whose ping went unanswered.

use crate::connection::ConnectionRegistry;
use crate::protocol::{CloseCode, GatewayMessage};
use courier_common::{RealtimeConfig, SessionId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Drives the per-session heartbeat state machine
#[derive(Debug)]
pub struct HeartbeatMonitor {
    registry: Arc<ConnectionRegistry>,
    ping_interval: Duration,
    ping_timeout: Duration,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, ping_interval: Duration, ping_timeout: Duration) -> Self {
        Self {
            registry,
            ping_interval,
            ping_timeout,
        }
    }

    #[must_use]
    pub fn from_config(registry: Arc<ConnectionRegistry>, config: &RealtimeConfig) -> Self {
        Self::new(
            registry,
            Duration::from_millis(config.ping_interval_ms),
            Duration::from_millis(config.ping_timeout_ms),
        )
    }

    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        self.ping_interval
    }

    #[must_use]
    pub fn ping_timeout(&self) -> Duration {
        self.ping_timeout
    }

    /// Ping every alive session idle for at least `ping_interval`
    ///
    /// Returns the number of pings sent.
    pub fn ping_sweep(&self) -> usize {
        let now = Instant::now();
        let mut pinged = 0;

        for entry in self.registry.entries() {
            if !entry.with_liveness(|liveness| liveness.try_ping(now, self.ping_interval)) {
                continue;
            }

            // A failed ping write already tore the session down
            if self
                .registry
                .send_to_session(entry.session_id(), GatewayMessage::ping())
                .is_ok()
            {
                pinged += 1;
                tracing::trace!(session_id = %entry.session_id(), "Liveness ping sent");
            }
        }

        pinged
    }

    /// Evict every session whose ping has gone unanswered for `ping_timeout`
    pub fn eviction_sweep(&self) -> Vec<SessionId> {
        let now = Instant::now();
        let mut evicted = Vec::new();

        for entry in self.registry.entries() {
            if !entry.with_liveness(|liveness| liveness.is_expired(now, self.ping_timeout)) {
                continue;
            }

            if self
                .registry
                .close(entry.session_id(), CloseCode::SessionTimeout)
                .is_some()
            {
                tracing::warn!(
                    session_id = %entry.session_id(),
                    user_id = %entry.user_id(),
                    "Session evicted after missed heartbeat"
                );
                evicted.push(entry.session_id().clone());
            }
        }

        evicted
    }

    /// Run both sweeps until `shutdown` flips to true
    pub fn start(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let start = Instant::now();
            let mut ping_ticker = interval_at(start + self.ping_interval, self.ping_interval);
            let mut eviction_ticker = interval_at(start + self.ping_timeout, self.ping_timeout);
            ping_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            eviction_ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                ping_interval_ms = self.ping_interval.as_millis() as u64,
                ping_timeout_ms = self.ping_timeout.as_millis() as u64,
                "Heartbeat monitor started"
            );

            loop {
                tokio::select! {
                    _ = ping_ticker.tick() => {
                        let pinged = self.ping_sweep();
                        if pinged > 0 {
                            tracing::debug!(pinged, "Ping sweep finished");
                        }
                    }
                    _ = eviction_ticker.tick() => {
                        let evicted = self.eviction_sweep();
                        if !evicted.is_empty() {
                            tracing::debug!(evicted = evicted.len(), "Eviction sweep finished");
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::info!("Heartbeat monitor stopped");
        })
    }
}
