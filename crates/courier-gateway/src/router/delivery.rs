//! Delivery outcome

use serde::Serialize;

/// Where an admitted event ended up
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum DeliveryResult {
    /// Queued on this many local sessions of the target, and relayed too
    /// when other instances also hold the target
    Delivered {
        sessions: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        relay_seq: Option<u64>,
    },
    /// Handed to the bus for the instance holding the target
    Relayed { seq: u64 },
    /// Target has no session anywhere; nothing was published
    Undelivered,
}

impl DeliveryResult {
    #[must_use]
    pub fn is_undelivered(&self) -> bool {
        matches!(self, Self::Undelivered)
    }

    /// Machine-readable reason code for the Undelivered case
    pub const UNDELIVERED_CODE: &'static str = "UNDELIVERED";
}
