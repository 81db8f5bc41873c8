//! Redis-backed message bus.

use super::{BusResult, MessageBus};
use crate::pool::{redact_url, RedisPool, RedisPoolConfig};
use crate::presence::PresenceDirectory;
use crate::pubsub::{Publisher, ReceivedMessage, Subscriber, SubscriberBuilder};
use async_trait::async_trait;
use courier_common::{InstanceId, RedisConfig, UserId};
use std::collections::HashSet;
use tokio::sync::broadcast;

/// Message bus over Redis pub/sub with a Redis set presence directory
pub struct RedisBus {
    channel: String,
    publisher: Publisher,
    subscriber: Subscriber,
    presence: PresenceDirectory,
}

impl RedisBus {
    /// Build the pool, verify Redis answers, and start the relay subscriber
    pub async fn connect(config: &RedisConfig) -> BusResult<Self> {
        let pool = RedisPool::new(&RedisPoolConfig::from(config))?;
        pool.health_check().await?;

        let subscriber = SubscriberBuilder::new()
            .redis_url(&config.url)
            .subscribe(&config.relay_channel)
            .build();

        tracing::info!(
            url = %redact_url(&config.url),
            channel = %config.relay_channel,
            "Redis message bus ready"
        );

        Ok(Self {
            channel: config.relay_channel.clone(),
            publisher: Publisher::new(pool.clone()),
            subscriber,
            presence: PresenceDirectory::new(pool),
        })
    }

    /// Relay channel name
    #[must_use]
    pub fn channel(&self) -> &str {
        &self.channel
    }
}

#[async_trait]
impl MessageBus for RedisBus {
    async fn publish(&self, payload: String) -> BusResult<()> {
        self.publisher.publish_raw(&self.channel, &payload).await?;
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.subscriber.receiver()
    }

    async fn mark_online(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()> {
        Ok(self.presence.add(user_id, instance_id).await?)
    }

    async fn mark_offline(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()> {
        Ok(self.presence.remove(user_id, instance_id).await?)
    }

    async fn instances_for(&self, user_id: &UserId) -> BusResult<HashSet<InstanceId>> {
        Ok(self.presence.instances(user_id).await?)
    }

    async fn shutdown(&self) -> BusResult<()> {
        Ok(self.subscriber.shutdown().await?)
    }
}

impl std::fmt::Debug for RedisBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBus")
            .field("channel", &self.channel)
            .field("subscriber", &self.subscriber)
            .finish()
    }
}
