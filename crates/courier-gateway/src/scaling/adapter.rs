//! Scaling adapter

use super::relay::RelayMessage;
use crate::error::{GatewayError, GatewayResult};
use courier_cache::{MessageBus, ReceivedMessage};
use courier_common::{EventType, InstanceId, ScalingConfig, UserId};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Callback for relay messages from other instances
pub type RelayHandler = Arc<dyn Fn(RelayMessage) + Send + Sync>;

/// Bridge between this instance and the shared bus
pub struct ScalingAdapter {
    bus: Arc<dyn MessageBus>,
    instance_id: InstanceId,
    publish_timeout: Duration,
    /// Last sequence number used by this origin
    sequence: AtomicU64,
    /// Self-originated messages dropped on receipt
    loops_discarded: AtomicU64,
}

impl ScalingAdapter {
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, instance_id: InstanceId, publish_timeout: Duration) -> Self {
        Self {
            bus,
            instance_id,
            publish_timeout,
            sequence: AtomicU64::new(0),
            loops_discarded: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn from_config(bus: Arc<dyn MessageBus>, instance_id: InstanceId, config: &ScalingConfig) -> Self {
        Self::new(bus, instance_id, Duration::from_millis(config.publish_timeout_ms))
    }

    #[must_use]
    pub fn instance_id(&self) -> &InstanceId {
        &self.instance_id
    }

    #[must_use]
    pub fn loops_discarded(&self) -> u64 {
        self.loops_discarded.load(Ordering::Relaxed)
    }

    /// Build an envelope carrying the next sequence number of this origin
    pub fn envelope(&self, target_user_id: UserId, event_type: EventType, payload: Value) -> RelayMessage {
        RelayMessage {
            target_user_id,
            event_type,
            payload,
            origin_instance: self.instance_id.clone(),
            seq: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
        }
    }

    /// Broadcast a relay message to the other instances
    ///
    /// Fails with `DeliveryTimeout` if the bus does not accept it within the
    /// publish timeout. Nothing is retried.
    pub async fn publish(&self, message: &RelayMessage) -> GatewayResult<()> {
        let payload = message.to_json()?;
        self.bounded(self.bus.publish(payload)).await?;

        tracing::trace!(
            target_user = %message.target_user_id,
            event_type = %message.event_type,
            seq = message.seq,
            "Relay message published"
        );
        Ok(())
    }

    /// Whether any other instance holds a session for the user
    pub async fn is_reachable(&self, user_id: &UserId) -> GatewayResult<bool> {
        let instances = self.bounded(self.bus.instances_for(user_id)).await?;
        Ok(instances.iter().any(|instance| instance != &self.instance_id))
    }

    /// Relay an event to whichever other instances hold the user
    ///
    /// The presence lookup and the publish share one deadline of the publish
    /// timeout. Returns the relay sequence number, or `None` when no other
    /// instance holds a session for the user.
    pub async fn relay(
        &self,
        target_user_id: &UserId,
        event_type: EventType,
        payload: Value,
    ) -> GatewayResult<Option<u64>> {
        let deadline = Instant::now() + self.publish_timeout;
        match tokio::time::timeout_at(deadline, self.relay_unbounded(target_user_id, event_type, payload)).await {
            Ok(result) => result,
            Err(_) => Err(self.timeout_error()),
        }
    }

    async fn relay_unbounded(
        &self,
        target_user_id: &UserId,
        event_type: EventType,
        payload: Value,
    ) -> GatewayResult<Option<u64>> {
        let instances = self.bus.instances_for(target_user_id).await?;
        if !instances.iter().any(|instance| instance != &self.instance_id) {
            return Ok(None);
        }

        let message = self.envelope(target_user_id.clone(), event_type, payload);
        self.bus.publish(message.to_json()?).await?;

        tracing::trace!(
            target_user = %message.target_user_id,
            event_type = %message.event_type,
            seq = message.seq,
            "Relay message published"
        );
        Ok(Some(message.seq))
    }

    /// Advertise that this instance holds sessions for the user
    pub async fn mark_online(&self, user_id: &UserId) -> GatewayResult<()> {
        self.bounded(self.bus.mark_online(user_id, &self.instance_id)).await
    }

    /// Withdraw this instance from the user's presence set
    pub async fn mark_offline(&self, user_id: &UserId) -> GatewayResult<()> {
        self.bounded(self.bus.mark_offline(user_id, &self.instance_id)).await
    }

    async fn bounded<T, F>(&self, operation: F) -> GatewayResult<T>
    where
        F: Future<Output = courier_cache::BusResult<T>>,
    {
        match tokio::time::timeout(self.publish_timeout, operation).await {
            Ok(result) => result.map_err(GatewayError::from),
            Err(_) => Err(self.timeout_error()),
        }
    }

    fn timeout_error(&self) -> GatewayError {
        GatewayError::DeliveryTimeout {
            timeout_ms: u64::try_from(self.publish_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Decode a raw bus message, dropping our own and malformed ones
    pub fn accept(&self, raw: &ReceivedMessage) -> Option<RelayMessage> {
        let message = match RelayMessage::from_json(&raw.payload) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(channel = %raw.channel, error = %e, "Malformed relay message dropped");
                return None;
            }
        };

        if message.origin_instance == self.instance_id {
            self.loops_discarded.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(seq = message.seq, "Self-originated relay message discarded");
            return None;
        }

        Some(message)
    }

    /// Invoke `handler` for every relay message from another instance
    ///
    /// Runs until `shutdown` flips to true or the bus closes.
    pub fn subscribe(self: &Arc<Self>, handler: RelayHandler, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let mut receiver = self.bus.subscribe();
        let adapter = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = receiver.recv() => match received {
                        Ok(raw) => {
                            if let Some(message) = adapter.accept(&raw) {
                                tracing::trace!(
                                    origin = %message.origin_instance,
                                    seq = message.seq,
                                    target_user = %message.target_user_id,
                                    "Relay message received"
                                );
                                handler(message);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            tracing::warn!(lagged = n, "Relay subscriber lagged behind");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            tracing::warn!("Relay channel closed");
                            break;
                        }
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }

            tracing::debug!("Relay subscription ended");
        })
    }

    /// Release the bus
    pub async fn shutdown(&self) -> GatewayResult<()> {
        self.bus.shutdown().await.map_err(GatewayError::from)
    }
}

impl std::fmt::Debug for ScalingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScalingAdapter")
            .field("instance_id", &self.instance_id)
            .field("publish_timeout", &self.publish_timeout)
            .field("sequence", &self.sequence.load(Ordering::Relaxed))
            .finish()
    }
}
