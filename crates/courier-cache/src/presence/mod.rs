//! Presence storage module.
//!
//! Tracks which gateway instances hold sessions for each user.

mod user_presence;

pub use user_presence::{PresenceDirectory, PRESENCE_PREFIX};
