//! Redis Pub/Sub publisher.
//!
//! Publishes already-encoded relay envelopes to a named channel.

use crate::pool::{RedisPool, RedisResult};
use redis::AsyncCommands;

/// Redis Pub/Sub publisher
#[derive(Clone)]
pub struct Publisher {
    pool: RedisPool,
}

impl Publisher {
    /// Create a new publisher
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Publish a raw message to a channel
    ///
    /// Returns the number of subscribers Redis handed the message to, which
    /// includes this instance's own subscriber.
    pub async fn publish_raw(&self, channel: &str, message: &str) -> RedisResult<u32> {
        let mut conn = self.pool.get().await?;
        let receivers: u32 = conn.publish(channel, message).await?;

        tracing::trace!(
            channel = %channel,
            bytes = message.len(),
            receivers = receivers,
            "Published raw message"
        );

        Ok(receivers)
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher").field("pool", &self.pool).finish()
    }
}
