//! Event routing
//!
//! The composition root: admission, metrics, local delivery and relay.

mod delivery;
mod event_router;

pub use delivery::DeliveryResult;
pub use event_router::EventRouter;
