//! Cross-instance presence directory in Redis.
//!
//! Each user maps to the set of gateway instances currently holding at least
//! one of their sessions. Gateways add themselves on a user's first local
//! session and remove themselves on the last one.

use crate::pool::{RedisPool, RedisResult};
use courier_common::{InstanceId, UserId};
use redis::AsyncCommands;
use std::collections::HashSet;

/// Key prefix for user presence sets
pub const PRESENCE_PREFIX: &str = "presence:";

/// Redis-backed presence directory
#[derive(Clone, Debug)]
pub struct PresenceDirectory {
    pool: RedisPool,
}

impl PresenceDirectory {
    /// Create a new presence directory
    #[must_use]
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    /// Generate Redis key for a user's instance set
    pub(crate) fn presence_key(user_id: &UserId) -> String {
        format!("{PRESENCE_PREFIX}{user_id}")
    }

    /// Record that `instance_id` holds sessions for the user
    pub async fn add(&self, user_id: &UserId, instance_id: &InstanceId) -> RedisResult<()> {
        let mut conn = self.pool.get().await?;
        conn.sadd::<_, _, ()>(Self::presence_key(user_id), instance_id.as_str())
            .await?;

        tracing::debug!(user_id = %user_id, instance = %instance_id, "Presence added");
        Ok(())
    }

    /// Record that `instance_id` no longer holds sessions for the user
    pub async fn remove(&self, user_id: &UserId, instance_id: &InstanceId) -> RedisResult<()> {
        let mut conn = self.pool.get().await?;
        conn.srem::<_, _, ()>(Self::presence_key(user_id), instance_id.as_str())
            .await?;

        tracing::debug!(user_id = %user_id, instance = %instance_id, "Presence removed");
        Ok(())
    }

    /// Instances currently holding sessions for the user
    pub async fn instances(&self, user_id: &UserId) -> RedisResult<HashSet<InstanceId>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<String> = conn.smembers(Self::presence_key(user_id)).await?;
        Ok(members.into_iter().map(InstanceId::from).collect())
    }
}
