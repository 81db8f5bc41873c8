//! Redis Pub/Sub module.
//!
//! Carries relay envelopes between gateway instances.

mod publisher;
mod subscriber;

pub use publisher::Publisher;
pub use subscriber::{
    ReceivedMessage, Subscriber, SubscriberBuilder, SubscriberConfig, SubscriberError,
    SubscriberResult,
};
