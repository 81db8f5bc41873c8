//! # courier-cache
//!
//! Shared-state layer that lets several gateway instances act as one.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **Pub/Sub**: Publisher and reconnecting subscriber for the relay channel
//! - **Presence**: Directory of which instances hold sessions for a user
//! - **Message Bus**: Backend-neutral trait with Redis and in-process implementations
//!
//! ## Example
//!
//! ```ignore
//! use courier_cache::{MessageBus, RedisBus};
//!
//! let bus = RedisBus::connect(&redis_config).await?;
//! let mut rx = bus.subscribe();
//! bus.publish(r#"{"seq":1}"#.to_string()).await?;
//! ```

pub mod bus;
pub mod pool;
pub mod presence;
pub mod pubsub;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolConfig, RedisPoolError, RedisResult};

// Re-export presence types
pub use presence::{PresenceDirectory, PRESENCE_PREFIX};

// Re-export pubsub types
pub use pubsub::{
    Publisher, ReceivedMessage, Subscriber, SubscriberBuilder, SubscriberConfig, SubscriberError,
    SubscriberResult,
};

// Re-export bus types
pub use bus::{BusError, BusResult, InMemoryBus, InMemoryHub, MessageBus, RedisBus};
