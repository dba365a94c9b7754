//! In-process duplex transport.
//!
//! Two paired endpoints connected by unbounded channels. Dropping or closing
//! one side surfaces as a clean close (`recv -> None`) on the other, which is
//! exactly what reconnect tests need to simulate a dropped link.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use tether_core::{Transport, TransportError};

/// One endpoint of an in-process duplex pair.
pub struct MemoryTransport {
    tx: Option<mpsc::UnboundedSender<Bytes>>,
    rx: mpsc::UnboundedReceiver<Bytes>,
}

/// Create a connected pair of endpoints.
#[must_use]
pub fn pair() -> (MemoryTransport, MemoryTransport) {
    let (a_tx, b_rx) = mpsc::unbounded_channel();
    let (b_tx, a_rx) = mpsc::unbounded_channel();
    (
        MemoryTransport {
            tx: Some(a_tx),
            rx: a_rx,
        },
        MemoryTransport {
            tx: Some(b_tx),
            rx: b_rx,
        },
    )
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        let tx = self.tx.as_ref().ok_or(TransportError::Closed)?;
        tx.send(frame).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        // Dropping the sender lets the peer observe a clean close.
        self.tx.take();
        self.rx.close();
    }
}
