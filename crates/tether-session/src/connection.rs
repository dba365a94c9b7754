//! One live transport-backed channel, bound to exactly one session at a time.

use std::sync::{
    Arc, RwLock,
    atomic::{AtomicU64, Ordering},
};

use tokio::sync::{Notify, mpsc};

use tether_core::{Packet, ProtocolError, RpcError, SharedSerializer, transport::BoxTransport};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport handed over, I/O task not yet running.
    Connecting,
    /// Live; `send` is accepted.
    Open,
    /// Terminal. The transport has been released.
    Closed,
}

/// Item produced by the I/O task for the session's routing loop.
///
/// `Err` carries a decode failure; the routing loop treats it as fatal to
/// this connection. Channel end means the transport closed.
pub(crate) type Inbound = Result<Packet, ProtocolError>;

/// A live channel to the peer.
///
/// The connection owns its transport through a single I/O task that selects
/// between the outgoing queue and `transport.recv()`. Closing a connection
/// never touches session bookkeeping; the pending call queue belongs to the
/// session, not the connection.
pub struct Connection {
    id: u64,
    state: Arc<RwLock<ConnectionState>>,
    outgoing: mpsc::UnboundedSender<Packet>,
    shutdown: Arc<Notify>,
}

impl Connection {
    /// Take ownership of an established transport and start the I/O task.
    ///
    /// Returns the connection handle plus the inbound packet receiver the
    /// session's routing loop consumes.
    #[must_use]
    pub(crate) fn establish(
        transport: BoxTransport,
        serializer: SharedSerializer,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Inbound>) {
        let state = Arc::new(RwLock::new(ConnectionState::Connecting));
        let shutdown = Arc::new(Notify::new());
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (in_tx, in_rx) = mpsc::unbounded_channel();

        let connection = Arc::new(Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            state: Arc::clone(&state),
            outgoing: out_tx,
            shutdown: Arc::clone(&shutdown),
        });

        *state.write().unwrap_or_else(std::sync::PoisonError::into_inner) = ConnectionState::Open;

        tokio::spawn(io_loop(
            transport, serializer, state, shutdown, out_rx, in_tx,
        ));

        (connection, in_rx)
    }

    /// Stable id distinguishing this connection from its successors.
    #[must_use]
    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue a packet for transmission.
    ///
    /// # Errors
    /// Returns `NotConnected` unless the connection is open. Callers must
    /// buffer through the session's resend path instead of retrying blindly.
    pub fn send(&self, packet: Packet) -> Result<(), RpcError> {
        if !self.is_open() {
            return Err(RpcError::NotConnected);
        }
        self.outgoing
            .send(packet)
            .map_err(|_| RpcError::NotConnected)
    }

    /// Close the connection. Idempotent.
    ///
    /// The I/O task releases the transport; the session detaches without
    /// losing queued calls.
    pub fn close(&self) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *state == ConnectionState::Closed {
            return;
        }
        *state = ConnectionState::Closed;
        drop(state);
        self.shutdown.notify_one();
    }
}

enum IoStep {
    Outgoing(Option<Packet>),
    Inbound(Result<Option<bytes::Bytes>, tether_core::TransportError>),
    Shutdown,
}

async fn io_loop(
    mut transport: BoxTransport,
    serializer: SharedSerializer,
    state: Arc<RwLock<ConnectionState>>,
    shutdown: Arc<Notify>,
    mut out_rx: mpsc::UnboundedReceiver<Packet>,
    in_tx: mpsc::UnboundedSender<Inbound>,
) {
    loop {
        // The recv future is dropped before the transport is used again, so
        // `Transport::recv` must be cancellation-safe.
        let step = tokio::select! {
            outgoing = out_rx.recv() => IoStep::Outgoing(outgoing),
            frame = transport.recv() => IoStep::Inbound(frame),
            () = shutdown.notified() => IoStep::Shutdown,
        };

        match step {
            IoStep::Outgoing(Some(packet)) => {
                let frame = match serializer.encode(&packet) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::error!("failed to encode packet: {e}");
                        continue;
                    }
                };
                if let Err(e) = transport.send(frame).await {
                    tracing::debug!("transport send failed: {e}");
                    break;
                }
            }
            IoStep::Inbound(Ok(Some(frame))) => match serializer.decode(&frame) {
                Ok(packet) => {
                    if in_tx.send(Ok(packet)).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    // Malformed input is fatal to this connection.
                    let _ = in_tx.send(Err(e));
                    break;
                }
            },
            IoStep::Inbound(Err(e)) => {
                tracing::debug!("transport recv failed: {e}");
                break;
            }
            // Clean peer close, outgoing queue dropped, or close() called.
            IoStep::Inbound(Ok(None)) | IoStep::Outgoing(None) | IoStep::Shutdown => break,
        }
    }

    transport.close().await;
    *state
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner) = ConnectionState::Closed;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_stub::StubTransport;
    use std::sync::Arc;
    use tether_core::JsonSerializer;

    mod async_stub {
        use async_trait::async_trait;
        use bytes::Bytes;
        use tether_core::{Transport, TransportError};
        use tokio::sync::mpsc;

        /// Transport that records sent frames and yields queued ones.
        pub struct StubTransport {
            pub sent: mpsc::UnboundedSender<Bytes>,
            pub feed: mpsc::UnboundedReceiver<Bytes>,
        }

        #[async_trait]
        impl Transport for StubTransport {
            async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
                self.sent.send(frame).map_err(|_| TransportError::Closed)
            }

            async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
                Ok(self.feed.recv().await)
            }

            async fn close(&mut self) {
                self.feed.close();
            }
        }
    }

    fn stub() -> (
        StubTransport,
        mpsc::UnboundedReceiver<bytes::Bytes>,
        mpsc::UnboundedSender<bytes::Bytes>,
    ) {
        let (sent_tx, sent_rx) = mpsc::unbounded_channel();
        let (feed_tx, feed_rx) = mpsc::unbounded_channel();
        (
            StubTransport {
                sent: sent_tx,
                feed: feed_rx,
            },
            sent_rx,
            feed_tx,
        )
    }

    #[tokio::test]
    async fn test_send_requires_open() {
        let (transport, _sent, _feed) = stub();
        let (conn, _inbound) = Connection::establish(Box::new(transport), Arc::new(JsonSerializer));
        assert!(conn.is_open());

        conn.close();
        let err = conn
            .send(Packet::Handshake {
                session_token: None,
            })
            .unwrap_err();
        assert!(matches!(err, RpcError::NotConnected));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (transport, _sent, _feed) = stub();
        let (conn, _inbound) = Connection::establish(Box::new(transport), Arc::new(JsonSerializer));
        conn.close();
        conn.close();
        assert_eq!(conn.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn test_malformed_frame_surfaces_protocol_error() {
        let (transport, _sent, feed) = stub();
        let (_conn, mut inbound) =
            Connection::establish(Box::new(transport), Arc::new(JsonSerializer));

        feed.send(bytes::Bytes::from_static(b"{broken")).unwrap();
        let item = inbound.recv().await.expect("inbound item");
        assert!(item.is_err());
        // The I/O task stops after a decode failure.
        assert!(inbound.recv().await.is_none());
    }
}
