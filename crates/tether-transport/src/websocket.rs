//! WebSocket transport: adapts an axum socket to the `Transport` trait and
//! exposes a router helper that feeds accepted sockets into a session pool.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
};
use bytes::Bytes;

use tether_core::{SharedSerializer, Transport, TransportError};
use tether_session::SessionPool;

/// One upgraded WebSocket as a frame transport.
///
/// Binary and text messages are frames; ping/pong is handled by axum and
/// skipped here.
pub struct WsTransport {
    socket: WebSocket,
}

impl WsTransport {
    #[must_use]
    pub fn new(socket: WebSocket) -> Self {
        Self { socket }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.socket
            .send(Message::Binary(frame))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }

    async fn recv(&mut self) -> Result<Option<Bytes>, TransportError> {
        loop {
            let Some(message) = self.socket.recv().await else {
                return Ok(None);
            };
            match message {
                Ok(msg @ (Message::Binary(_) | Message::Text(_))) => {
                    return Ok(Some(msg.into_data()));
                }
                Ok(Message::Close(_)) => return Ok(None),
                Ok(Message::Ping(_) | Message::Pong(_)) => {}
                Err(e) => return Err(TransportError::Io(std::io::Error::other(e))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.socket.send(Message::Close(None)).await;
    }
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    pub pool: Arc<SessionPool>,
    pub serializer: SharedSerializer,
}

/// WebSocket upgrade handler.
///
/// Use this as an axum route handler; each accepted socket goes through the
/// pool's handshake and attaches to its session.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(|socket| async move {
        let transport = Box::new(WsTransport::new(socket));
        if let Err(e) = state.pool.accept(transport, state.serializer).await {
            tracing::warn!("websocket handshake failed: {e}");
        }
    })
}

/// Router exposing the session pool at `/ws`.
///
/// # Example
/// ```ignore
/// let app = axum::Router::new().merge(router(pool, serializer));
/// ```
#[must_use]
pub fn router(pool: Arc<SessionPool>, serializer: SharedSerializer) -> axum::Router {
    axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .with_state(WsState { pool, serializer })
}
