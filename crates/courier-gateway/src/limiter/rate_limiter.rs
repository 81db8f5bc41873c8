//! Rate limiter
//!
//! One token bucket per (user, event type), created lazily on the first event
//! and dropped once the user has no sessions and the bucket sat idle past the
//! grace period.

use super::bucket::TokenBucket;
use crate::connection::ConnectionRegistry;
use crate::error::{GatewayError, GatewayResult};
use courier_common::{EventType, RealtimeConfig, UserId};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Per-user, per-event-type token bucket limiter
#[derive(Debug)]
pub struct RateLimiter {
    buckets: DashMap<(UserId, EventType), TokenBucket>,
    rate_per_second: u32,
    burst: u32,
    idle_grace: Duration,
}

impl RateLimiter {
    #[must_use]
    pub fn new(rate_per_second: u32, burst: u32, idle_grace: Duration) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_second,
            burst,
            idle_grace,
        }
    }

    #[must_use]
    pub fn from_config(config: &RealtimeConfig) -> Self {
        Self::new(
            config.max_events_per_second,
            config.rate_limit_burst,
            Duration::from_millis(config.bucket_idle_grace_ms),
        )
    }

    /// Admit one event or reject it with a retry hint
    ///
    /// Rejections are never retried here; the caller decides what to do.
    pub fn try_admit(&self, user_id: &UserId, event_type: &EventType) -> GatewayResult<()> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry((user_id.clone(), *event_type))
            .or_insert_with(|| TokenBucket::new(self.burst, self.rate_per_second, now));

        match bucket.try_take(now) {
            Ok(()) => Ok(()),
            Err(retry_after) => {
                drop(bucket);
                let retry_after_ms = u64::try_from(retry_after.as_millis())
                    .unwrap_or(u64::MAX)
                    .max(1);

                tracing::debug!(
                    user_id = %user_id,
                    event_type = %event_type,
                    retry_after_ms,
                    "Event rate limited"
                );

                Err(GatewayError::RateLimitExceeded {
                    event_type: *event_type,
                    retry_after_ms,
                })
            }
        }
    }

    /// Tokens left in a bucket, if it exists
    #[must_use]
    pub fn available(&self, user_id: &UserId, event_type: &EventType) -> Option<f64> {
        self.buckets
            .get(&(user_id.clone(), *event_type))
            .map(|bucket| bucket.tokens())
    }

    /// Number of live buckets
    #[must_use]
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Drop idle buckets of users with no local session
    ///
    /// Returns the number of buckets removed.
    pub fn gc(&self, registry: &ConnectionRegistry) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();

        self.buckets.retain(|(user_id, _), bucket| {
            !bucket.is_idle(now, self.idle_grace) || registry.is_local(user_id)
        });

        let removed = before.saturating_sub(self.buckets.len());
        if removed > 0 {
            tracing::debug!(removed, remaining = self.buckets.len(), "Rate buckets collected");
        }
        removed
    }

    /// Collect idle buckets every grace period until `shutdown` flips to true
    pub fn start_gc(
        self: Arc<Self>,
        registry: Arc<ConnectionRegistry>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let period = self.idle_grace.max(Duration::from_millis(1));
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.gc(&registry);
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Rate bucket collector stopped");
        })
    }
}
