//! Connection management
//!
//! Tracks live sessions per user and owns every session's outbound queue.

mod presence;
mod registry;
mod session;

pub use presence::PresenceEvent;
pub use registry::{ConnectionRegistry, LocalDelivery};
pub use session::{OutboundFrame, OutboundReceiver, SessionInfo, TransportHandle, TransportKind};

pub(crate) use session::SessionEntry;
