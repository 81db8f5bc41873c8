//! # courier-gateway
//!
//! Realtime event delivery gateway. Holds user sessions, routes typed events
//! between users with per-type rate limits, checks liveness, aggregates
//! sliding-window metrics and relays events to peer instances over a bus.

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod limiter;
pub mod metrics;
pub mod protocol;
pub mod router;
pub mod scaling;
pub mod server;

pub use connection::{ConnectionRegistry, PresenceEvent, SessionInfo, TransportHandle, TransportKind};
pub use error::{GatewayError, GatewayResult};
pub use router::{DeliveryResult, EventRouter};
pub use server::{connect_bus, create_app, run, serve, GatewayState};
