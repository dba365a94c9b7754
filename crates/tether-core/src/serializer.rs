//! Packet encoding.

use std::sync::Arc;

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::packet::Packet;

/// Converts packets to and from wire frames.
pub trait Serializer: Send + Sync {
    /// Encode a packet into one frame.
    ///
    /// # Errors
    /// Returns error if the packet cannot be represented in this encoding.
    fn encode(&self, packet: &Packet) -> Result<Bytes, ProtocolError>;

    /// Decode one frame into a packet.
    ///
    /// # Errors
    /// Returns error on malformed input; the connection treats this as fatal.
    fn decode(&self, frame: &[u8]) -> Result<Packet, ProtocolError>;
}

/// Shared serializer handle.
pub type SharedSerializer = Arc<dyn Serializer>;

/// JSON encoding, one packet per frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn encode(&self, packet: &Packet) -> Result<Bytes, ProtocolError> {
        serde_json::to_vec(packet)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::Encode(e.to_string()))
    }

    fn decode(&self, frame: &[u8]) -> Result<Packet, ProtocolError> {
        serde_json::from_slice(frame).map_err(|e| ProtocolError::Malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_roundtrip() {
        let serializer = JsonSerializer;
        let packet = Packet::call(1, "chat", "send", vec![json!("hi")]);
        let frame = serializer.encode(&packet).unwrap();
        let decoded = serializer.decode(&frame).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn test_garbage_is_malformed() {
        let serializer = JsonSerializer;
        let err = serializer.decode(b"{not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Malformed(_)));
    }
}
