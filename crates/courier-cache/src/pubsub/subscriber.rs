//! Redis Pub/Sub subscriber.
//!
//! Holds a dedicated pub/sub connection in a background task, reconnects on
//! failure, and fans received messages out over a broadcast channel.

use futures_util::StreamExt;
use redis::Client;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};

/// Error type for subscriber operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;

/// Message received on a subscribed channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Channel the message was received on
    pub channel: String,
    /// Raw payload
    pub payload: String,
}

impl ReceivedMessage {
    #[must_use]
    pub fn new(channel: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            payload: payload.into(),
        }
    }
}

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Channel buffer size for broadcast
    pub broadcast_buffer: usize,
    /// Reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            broadcast_buffer: 1024,
            reconnect_delay_ms: 1000,
        }
    }
}

/// Commands for subscription management
#[derive(Debug)]
enum SubscriberCommand {
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Shutdown,
}

/// Redis Pub/Sub subscriber
pub struct Subscriber {
    /// Currently subscribed channels, replayed after every reconnect
    subscribed: Arc<RwLock<HashSet<String>>>,
    /// Broadcast sender for messages
    broadcast_tx: broadcast::Sender<ReceivedMessage>,
    /// Control channel for subscription management
    control_tx: mpsc::Sender<SubscriberCommand>,
    /// Whether the pub/sub connection is currently up
    connected: Arc<AtomicBool>,
}

impl Subscriber {
    /// Create a new subscriber and start the background listener
    pub fn start(config: SubscriberConfig, channels: HashSet<String>) -> Self {
        let (broadcast_tx, _) = broadcast::channel(config.broadcast_buffer);
        let (control_tx, control_rx) = mpsc::channel(32);
        let subscribed = Arc::new(RwLock::new(channels));
        let connected = Arc::new(AtomicBool::new(false));

        tokio::spawn(Self::listener_loop(
            config,
            subscribed.clone(),
            broadcast_tx.clone(),
            control_rx,
            connected.clone(),
        ));

        Self {
            subscribed,
            broadcast_tx,
            control_tx,
            connected,
        }
    }

    /// Background listener loop
    async fn listener_loop(
        config: SubscriberConfig,
        subscribed: Arc<RwLock<HashSet<String>>>,
        broadcast_tx: broadcast::Sender<ReceivedMessage>,
        mut control_rx: mpsc::Receiver<SubscriberCommand>,
        connected: Arc<AtomicBool>,
    ) {
        loop {
            let outcome = Self::run_listener(&config, &subscribed, &broadcast_tx, &mut control_rx, &connected).await;
            connected.store(false, Ordering::SeqCst);

            match outcome {
                Ok(true) => {
                    tracing::info!("Subscriber shutting down");
                    break;
                }
                Ok(false) => {
                    tracing::warn!("Pub/Sub stream ended, reconnecting...");
                }
                Err(e) => {
                    tracing::error!(error = %e, "Subscriber error, reconnecting...");
                }
            }

            // Keep serving control commands while waiting to reconnect
            let backoff = tokio::time::sleep(tokio::time::Duration::from_millis(config.reconnect_delay_ms));
            tokio::pin!(backoff);
            loop {
                tokio::select! {
                    () = &mut backoff => break,
                    cmd = control_rx.recv() => match cmd {
                        Some(SubscriberCommand::Subscribe(channels)) => {
                            subscribed.write().await.extend(channels);
                        }
                        Some(SubscriberCommand::Unsubscribe(channels)) => {
                            let mut set = subscribed.write().await;
                            for channel in &channels {
                                set.remove(channel);
                            }
                        }
                        Some(SubscriberCommand::Shutdown) | None => {
                            tracing::info!("Subscriber shutting down while disconnected");
                            return;
                        }
                    },
                }
            }
        }
    }

    /// Run the listener until error or shutdown
    ///
    /// Returns `Ok(true)` on shutdown and `Ok(false)` when the stream ended.
    async fn run_listener(
        config: &SubscriberConfig,
        subscribed: &Arc<RwLock<HashSet<String>>>,
        broadcast_tx: &broadcast::Sender<ReceivedMessage>,
        control_rx: &mut mpsc::Receiver<SubscriberCommand>,
        connected: &Arc<AtomicBool>,
    ) -> SubscriberResult<bool> {
        let client = Client::open(config.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;

        {
            let channels = subscribed.read().await;
            for channel in channels.iter() {
                pubsub.subscribe(channel).await?;
            }
        }

        connected.store(true, Ordering::SeqCst);
        tracing::info!("Subscriber connected to Redis");

        let mut stream = pubsub.on_message();

        loop {
            tokio::select! {
                msg = stream.next() => {
                    let Some(msg) = msg else {
                        return Ok(false);
                    };

                    let channel = msg.get_channel_name().to_string();
                    let payload: String = match msg.get_payload() {
                        Ok(payload) => payload,
                        Err(e) => {
                            tracing::warn!(channel = %channel, error = %e, "Dropping undecodable Pub/Sub payload");
                            continue;
                        }
                    };

                    tracing::trace!(channel = %channel, "Received Pub/Sub message");

                    // No receivers is not an error; the gateway may not have subscribed yet
                    let _ = broadcast_tx.send(ReceivedMessage { channel, payload });
                }

                cmd = control_rx.recv() => {
                    match cmd {
                        Some(SubscriberCommand::Subscribe(channels)) => {
                            // The message stream borrows the connection, so release it first
                            drop(stream);
                            for channel in &channels {
                                if let Err(e) = pubsub.subscribe(channel).await {
                                    tracing::error!(channel = %channel, error = %e, "Failed to subscribe");
                                } else {
                                    subscribed.write().await.insert(channel.clone());
                                    tracing::debug!(channel = %channel, "Subscribed to channel");
                                }
                            }
                            stream = pubsub.on_message();
                        }
                        Some(SubscriberCommand::Unsubscribe(channels)) => {
                            drop(stream);
                            for channel in &channels {
                                if let Err(e) = pubsub.unsubscribe(channel).await {
                                    tracing::error!(channel = %channel, error = %e, "Failed to unsubscribe");
                                } else {
                                    subscribed.write().await.remove(channel);
                                    tracing::debug!(channel = %channel, "Unsubscribed from channel");
                                }
                            }
                            stream = pubsub.on_message();
                        }
                        Some(SubscriberCommand::Shutdown) | None => {
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }

    /// Subscribe to channels
    pub async fn subscribe(&self, channels: &[&str]) -> SubscriberResult<()> {
        let names = channels.iter().map(|c| (*c).to_string()).collect();
        self.control_tx
            .send(SubscriberCommand::Subscribe(names))
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }

    /// Unsubscribe from channels
    pub async fn unsubscribe(&self, channels: &[&str]) -> SubscriberResult<()> {
        let names = channels.iter().map(|c| (*c).to_string()).collect();
        self.control_tx
            .send(SubscriberCommand::Unsubscribe(names))
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }

    /// Get a receiver for broadcast messages
    #[must_use]
    pub fn receiver(&self) -> broadcast::Receiver<ReceivedMessage> {
        self.broadcast_tx.subscribe()
    }

    /// Get currently subscribed channels
    pub async fn subscribed_channels(&self) -> Vec<String> {
        self.subscribed.read().await.iter().cloned().collect()
    }

    /// Whether the background connection is currently established
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Shutdown the subscriber
    pub async fn shutdown(&self) -> SubscriberResult<()> {
        self.control_tx
            .send(SubscriberCommand::Shutdown)
            .await
            .map_err(|_| SubscriberError::ChannelClosed)
    }
}

impl std::fmt::Debug for Subscriber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscriber")
            .field("connected", &self.is_connected())
            .field("receivers", &self.broadcast_tx.receiver_count())
            .finish()
    }
}

/// Builder for subscriber
pub struct SubscriberBuilder {
    config: SubscriberConfig,
    initial_channels: HashSet<String>,
}

impl SubscriberBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SubscriberConfig::default(),
            initial_channels: HashSet::new(),
        }
    }

    /// Set Redis URL
    #[must_use]
    pub fn redis_url(mut self, url: impl Into<String>) -> Self {
        self.config.redis_url = url.into();
        self
    }

    /// Set broadcast buffer size
    #[must_use]
    pub fn broadcast_buffer(mut self, size: usize) -> Self {
        self.config.broadcast_buffer = size;
        self
    }

    /// Set reconnection delay
    #[must_use]
    pub fn reconnect_delay_ms(mut self, delay: u64) -> Self {
        self.config.reconnect_delay_ms = delay;
        self
    }

    /// Add initial channel subscription
    #[must_use]
    pub fn subscribe(mut self, channel: impl Into<String>) -> Self {
        self.initial_channels.insert(channel.into());
        self
    }

    /// Build and start the subscriber
    ///
    /// Initial channels are subscribed as soon as the connection comes up.
    #[must_use]
    pub fn build(self) -> Subscriber {
        Subscriber::start(self.config, self.initial_channels)
    }
}

impl Default for SubscriberBuilder {
    fn default() -> Self {
        Self::new()
    }
}
