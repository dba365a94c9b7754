//! Frame-oriented transport trait.

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportError;

/// A bidirectional, frame-oriented byte channel.
///
/// One transport backs exactly one connection. Framing, socket handling and
/// reconnection mechanics are the implementation's concern; the protocol
/// layer only sees whole frames.
#[async_trait]
pub trait Transport: Send {
    /// Send one frame to the peer.
    ///
    /// # Errors
    /// Returns error if the channel is closed or the write fails.
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError>;

    /// Receive the next frame. `None` means the peer closed cleanly.
    ///
    /// Must be cancellation-safe: dropping the returned future before it
    /// resolves must not lose a frame.
    ///
    /// # Errors
    /// Returns error on I/O failure.
    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError>;

    /// Release the underlying channel. Idempotent.
    async fn close(&mut self);
}

/// Boxed transport handed to a connection.
pub type BoxTransport = Box<dyn Transport>;
