//! Message bus backends.
//!
//! A `MessageBus` is the shared publish/subscribe medium plus presence
//! directory that lets gateway instances reach each other's users. It moves
//! opaque payloads only; envelopes, sequencing, loop prevention and timeouts
//! live above it in the gateway.

mod memory;
mod redis_bus;

pub use self::memory::{InMemoryBus, InMemoryHub};
pub use self::redis_bus::RedisBus;

use crate::pool::RedisPoolError;
use crate::pubsub::{ReceivedMessage, SubscriberError};
use async_trait::async_trait;
use courier_common::{InstanceId, UserId};
use std::collections::HashSet;
use tokio::sync::broadcast;

/// Error type for bus operations
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Redis pool error: {0}")]
    Pool(#[from] RedisPoolError),

    #[error("Subscriber error: {0}")]
    Subscriber(#[from] SubscriberError),

    #[error("Bus is closed")]
    Closed,
}

impl From<redis::RedisError> for BusError {
    fn from(err: redis::RedisError) -> Self {
        Self::Pool(RedisPoolError::Redis(err))
    }
}

/// Result type for bus operations
pub type BusResult<T> = Result<T, BusError>;

/// Shared channel between gateway instances
#[async_trait]
pub trait MessageBus: Send + Sync + 'static {
    /// Broadcast a payload to every subscribed instance, possibly including this one
    async fn publish(&self, payload: String) -> BusResult<()>;

    /// Receive every payload published on the shared channel
    fn subscribe(&self) -> broadcast::Receiver<ReceivedMessage>;

    /// Record that `instance_id` now holds sessions for the user
    async fn mark_online(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()>;

    /// Record that `instance_id` no longer holds sessions for the user
    async fn mark_offline(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()>;

    /// Instances currently holding sessions for the user
    async fn instances_for(&self, user_id: &UserId) -> BusResult<HashSet<InstanceId>>;

    /// Release background resources
    async fn shutdown(&self) -> BusResult<()> {
        Ok(())
    }
}
