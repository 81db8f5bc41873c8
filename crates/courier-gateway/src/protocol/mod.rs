//! Gateway protocol definitions
//!
//! Defines the WebSocket frame format, op codes, and close codes.

mod close_codes;
mod messages;
mod opcodes;
mod payloads;

pub use close_codes::CloseCode;
pub use messages::{ClientEventError, GatewayMessage};
pub use opcodes::OpCode;
pub use payloads::{ClientEventPayload, ErrorPayload, HelloPayload};
