//! Connection/session lifecycle with resendable calls and event retranslation.
//!
//! A [`Session`] is a reconnect-durable identity that outlives any single
//! [`Connection`]. Calls issued while disconnected (or left unconfirmed by a
//! dropped connection) are buffered and replayed, in issuance order, when a
//! new connection attaches under the same session token. [`RemoteProxy`]
//! presents a remote interface as a local object and mirrors named events to
//! the peer without echoing them back.

pub mod calls;
pub mod connection;
pub mod dispatcher;
pub mod events;
pub mod pool;
pub mod proxy;
pub mod session;

pub use calls::CallState;
pub use connection::{Connection, ConnectionState};
pub use dispatcher::Dispatcher;
pub use events::RemoteEvent;
pub use pool::SessionPool;
pub use proxy::RemoteProxy;
pub use session::{Session, SessionConfig, connect};
