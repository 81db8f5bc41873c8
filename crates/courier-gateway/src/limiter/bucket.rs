//! Token bucket
//!
//! Refills lazily on each call: `elapsed * rate` tokens, capped at capacity.

use std::time::Duration;
use tokio::time::Instant;

/// Token state for one (user, event type) pair
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    /// Tokens per second
    rate: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(capacity: u32, rate_per_second: u32, now: Instant) -> Self {
        Self {
            tokens: f64::from(capacity),
            capacity: f64::from(capacity),
            rate: f64::from(rate_per_second),
            last_refill: now,
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        self.tokens = (self.tokens + elapsed.as_secs_f64() * self.rate).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token, or return how long until one is available
    pub fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else if self.rate > 0.0 {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / self.rate))
        } else {
            Err(Duration::MAX)
        }
    }

    /// Tokens currently available, without refilling
    #[must_use]
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    #[must_use]
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Whether the bucket has not been used for at least `grace`
    #[must_use]
    pub fn is_idle(&self, now: Instant, grace: Duration) -> bool {
        now.saturating_duration_since(self.last_refill) >= grace
    }
}
