//! Integration test utilities for the courier gateway
//!
//! This crate provides helpers for running end-to-end tests against
//! the WebSocket gateway and its HTTP endpoints.

pub mod helpers;

pub use helpers::*;
