//! Error taxonomy for connections, sessions and calls.
//!
//! Transport and protocol failures close a connection but never destroy its
//! session; call-level failures surface only to the affected call.

use thiserror::Error;

use crate::packet::{CorrelationId, ErrorCode, WireError};

/// Transport establishment or I/O failure. Recoverable by reconnecting.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("transport closed")]
    Closed,
}

/// Malformed or unexpected packet. Fatal to the connection that produced it.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed packet: {0}")]
    Malformed(String),
    #[error("failed to encode packet: {0}")]
    Encode(String),
    #[error("handshake error: {0}")]
    Handshake(String),
}

/// Failure surfaced to a single call or to the session API.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("not connected")]
    NotConnected,
    #[error("session lost before delivery")]
    SessionLost,
    #[error("call timed out")]
    CallTimeout,
    #[error("unknown correlation id: {0}")]
    UnknownCorrelation(CorrelationId),
    #[error("unknown interface: {0}")]
    UnknownInterface(String),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
    #[error("remote error: {0}")]
    Remote(String),
}

impl RpcError {
    /// Convert into the serializable form carried by a callback packet.
    #[must_use]
    pub fn to_wire(&self) -> WireError {
        let code = match self {
            Self::UnknownInterface(_) => ErrorCode::UnknownInterface,
            Self::UnknownMethod(_) => ErrorCode::UnknownMethod,
            Self::Remote(_) => ErrorCode::Remote,
            _ => ErrorCode::Internal,
        };
        WireError {
            code,
            message: self.to_string(),
        }
    }
}

impl From<WireError> for RpcError {
    fn from(err: WireError) -> Self {
        match err.code {
            ErrorCode::UnknownInterface => Self::UnknownInterface(err.message),
            ErrorCode::UnknownMethod => Self::UnknownMethod(err.message),
            ErrorCode::Remote | ErrorCode::Internal => Self::Remote(err.message),
        }
    }
}
