//! Liveness probing and stale-session eviction

mod monitor;
mod state;

pub use monitor::HeartbeatMonitor;
pub use state::{HeartbeatState, Liveness};
