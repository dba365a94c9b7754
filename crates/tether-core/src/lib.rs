//! Core abstractions for the tether RPC protocol.
//!
//! This crate provides the fundamental building blocks:
//! - `Packet` - Typed wire packet enum (handshake, call, callback, event)
//! - Error taxonomy (`TransportError`, `ProtocolError`, `RpcError`)
//! - `Transport` - Frame-oriented byte channel trait
//! - `Serializer` - Packet encoding trait with a JSON implementation
//! - `InterfaceRegistry` - Named method handler lookup for inbound calls

pub mod error;
pub mod packet;
pub mod registry;
pub mod serializer;
pub mod transport;

pub use error::{ProtocolError, RpcError, TransportError};
pub use packet::{CallOutcome, CorrelationId, ErrorCode, Packet, WireError};
pub use registry::{Handler, Interface, InterfaceRegistry};
pub use serializer::{JsonSerializer, Serializer, SharedSerializer};
pub use transport::{BoxTransport, Transport};
