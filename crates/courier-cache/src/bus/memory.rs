//! In-process message bus.
//!
//! One `InMemoryHub` stands in for the shared broker; every simulated
//! instance takes its own `InMemoryBus` handle from it. Like Redis, the hub
//! hands each published payload to every subscriber, the publisher included.

use super::{BusError, BusResult, MessageBus};
use crate::pubsub::ReceivedMessage;
use async_trait::async_trait;
use courier_common::{InstanceId, UserId};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Channel name reported on messages from the in-process hub
pub const IN_MEMORY_CHANNEL: &str = "in-memory";

/// Shared in-process broker
pub struct InMemoryHub {
    tx: broadcast::Sender<ReceivedMessage>,
    presence: DashMap<UserId, HashSet<InstanceId>>,
    published: AtomicU64,
}

impl InMemoryHub {
    /// Create a hub whose subscribers buffer up to `buffer` messages
    #[must_use]
    pub fn new(buffer: usize) -> Arc<Self> {
        let (tx, _) = broadcast::channel(buffer);
        Arc::new(Self {
            tx,
            presence: DashMap::new(),
            published: AtomicU64::new(0),
        })
    }

    /// Attach a new instance to the hub
    #[must_use]
    pub fn bus(self: &Arc<Self>) -> InMemoryBus {
        InMemoryBus {
            hub: Arc::clone(self),
            closed: AtomicBool::new(false),
        }
    }

    /// Number of payloads published through the hub so far
    #[must_use]
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    /// Inject a payload as if some instance had published it
    pub fn inject(&self, payload: impl Into<String>) {
        let _ = self.tx.send(ReceivedMessage::new(IN_MEMORY_CHANNEL, payload));
    }
}

impl std::fmt::Debug for InMemoryHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryHub")
            .field("subscribers", &self.tx.receiver_count())
            .field("users", &self.presence.len())
            .field("published", &self.published_count())
            .finish()
    }
}

/// One instance's handle on an `InMemoryHub`
#[derive(Debug)]
pub struct InMemoryBus {
    hub: Arc<InMemoryHub>,
    closed: AtomicBool,
}

impl InMemoryBus {
    /// Standalone bus for a single-instance deployment
    #[must_use]
    pub fn standalone() -> Self {
        InMemoryHub::new(1024).bus()
    }

    /// The hub this handle is attached to
    #[must_use]
    pub fn hub(&self) -> &Arc<InMemoryHub> {
        &self.hub
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, payload: String) -> BusResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }

        self.hub.published.fetch_add(1, Ordering::SeqCst);
        // A hub without subscribers drops the message, same as Redis
        let _ = self.hub.tx.send(ReceivedMessage::new(IN_MEMORY_CHANNEL, payload));
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.hub.tx.subscribe()
    }

    async fn mark_online(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()> {
        self.hub
            .presence
            .entry(user_id.clone())
            .or_default()
            .insert(instance_id.clone());
        Ok(())
    }

    async fn mark_offline(&self, user_id: &UserId, instance_id: &InstanceId) -> BusResult<()> {
        self.hub.presence.alter(user_id, |_, mut instances| {
            instances.remove(instance_id);
            instances
        });
        self.hub.presence.remove_if(user_id, |_, instances| instances.is_empty());
        Ok(())
    }

    async fn instances_for(&self, user_id: &UserId) -> BusResult<HashSet<InstanceId>> {
        Ok(self
            .hub
            .presence
            .get(user_id)
            .map(|instances| instances.clone())
            .unwrap_or_default())
    }

    async fn shutdown(&self) -> BusResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
