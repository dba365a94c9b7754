//! Wire packets exchanged between peers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Correlation id tying a callback to its call. Never reused within a session.
pub type CorrelationId = u64;

/// One structured message on the wire. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Packet {
    /// Establishes or resumes a session. A client presents its token when
    /// reconnecting; the server always replies with the session's token.
    Handshake { session_token: Option<Uuid> },
    /// Remote method invocation.
    Call {
        correlation_id: CorrelationId,
        interface: String,
        method: String,
        args: Vec<Value>,
    },
    /// Response to a call, matched by correlation id.
    Callback {
        correlation_id: CorrelationId,
        outcome: CallOutcome,
    },
    /// Named event. Carries no correlation id and expects no response.
    Event {
        interface: String,
        event: String,
        args: Value,
    },
}

impl Packet {
    /// Build a call packet.
    #[must_use]
    pub fn call(
        correlation_id: CorrelationId,
        interface: impl Into<String>,
        method: impl Into<String>,
        args: Vec<Value>,
    ) -> Self {
        Self::Call {
            correlation_id,
            interface: interface.into(),
            method: method.into(),
            args,
        }
    }

    /// Build a successful callback packet.
    #[must_use]
    pub fn callback_ok(correlation_id: CorrelationId, value: Value) -> Self {
        Self::Callback {
            correlation_id,
            outcome: CallOutcome::Ok { value },
        }
    }

    /// Build a failed callback packet.
    #[must_use]
    pub fn callback_err(correlation_id: CorrelationId, error: WireError) -> Self {
        Self::Callback {
            correlation_id,
            outcome: CallOutcome::Err { error },
        }
    }

    /// Build an event packet.
    #[must_use]
    pub fn event(interface: impl Into<String>, event: impl Into<String>, args: Value) -> Self {
        Self::Event {
            interface: interface.into(),
            event: event.into(),
            args,
        }
    }
}

/// Result carried by a callback packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallOutcome {
    Ok { value: Value },
    Err { error: WireError },
}

/// Wire-visible error category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// No interface registered under that name.
    UnknownInterface,
    /// The interface exists but has no such method.
    UnknownMethod,
    /// The handler ran and reported an application error.
    Remote,
    /// Peer-side failure outside the handler.
    Internal,
}

/// Serializable error carried in a callback packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub code: ErrorCode,
    pub message: String,
}

impl WireError {
    /// Application error reported by a handler.
    #[must_use]
    pub fn remote(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Remote,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: ErrorCode::Internal,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for WireError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}
