//! Cross-instance relay
//!
//! Wraps a `MessageBus` backend with the contracts every backend must keep:
//! bounded publish time, per-origin sequence numbers and loop prevention.

mod adapter;
mod relay;

pub use adapter::{RelayHandler, ScalingAdapter};
pub use relay::RelayMessage;
