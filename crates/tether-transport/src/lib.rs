//! Transport implementations for tether sessions.
//!
//! - `memory` - in-process duplex pair, the test and demo vehicle
//! - `websocket` - axum WebSocket adapter and router helper (feature-gated)

pub mod memory;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use memory::{MemoryTransport, pair};
