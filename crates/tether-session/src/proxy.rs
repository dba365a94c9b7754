//! Local facade over a remote interface: methods and events.

use std::{collections::HashSet, sync::Arc};

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use tether_core::RpcError;

use crate::events::RemoteEvent;
use crate::session::Session;

/// Maps method names onto outgoing calls through a session and represents
/// the remote interface's event channel.
///
/// The method set is a fixed dispatch table built once per proxy; calling a
/// name outside it fails locally with `UnknownMethod`. The proxy references
/// its session, it does not own it.
///
/// The original calling convention distinguished a call from a notification
/// by whether the trailing argument was invocable; here that ambiguity is
/// resolved statically: [`call`](Self::call) awaits a result,
/// [`notify`](Self::notify) treats every argument as data.
pub struct RemoteProxy {
    session: Arc<Session>,
    interface: String,
    methods: HashSet<String>,
}

impl RemoteProxy {
    #[must_use]
    pub fn new<I, S>(session: Arc<Session>, interface: impl Into<String>, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            session,
            interface: interface.into(),
            methods: methods.into_iter().map(Into::into).collect(),
        }
    }

    #[must_use]
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// Names in the dispatch table.
    pub fn methods(&self) -> impl Iterator<Item = &str> {
        self.methods.iter().map(String::as_str)
    }

    fn ensure_method(&self, method: &str) -> Result<(), RpcError> {
        if self.methods.contains(method) {
            Ok(())
        } else {
            Err(RpcError::UnknownMethod(format!(
                "{}.{method}",
                self.interface
            )))
        }
    }

    /// Call a remote method and await its result.
    ///
    /// # Errors
    /// Fails locally with `UnknownMethod` for names outside the dispatch
    /// table, with `NotConnected` when disconnected, or with whatever the
    /// peer reports.
    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.ensure_method(method)?;
        self.session.call_method(&self.interface, method, args).await
    }

    /// Like [`call`](Self::call), but buffers across disconnection and is
    /// delivered exactly once after the session reattaches.
    ///
    /// # Errors
    /// Fails with `UnknownMethod`, `CallTimeout`, or the peer's error.
    pub async fn call_with_resend(&self, method: &str, args: Vec<Value>) -> Result<Value, RpcError> {
        self.ensure_method(method)?;
        self.session
            .call_method_with_resend(&self.interface, method, args)
            .await
    }

    /// Fire-and-forget invocation; every argument is data, no callback is
    /// registered.
    ///
    /// # Errors
    /// Fails with `UnknownMethod` or `NotConnected`.
    pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<(), RpcError> {
        self.ensure_method(method)?;
        self.session.notify(&self.interface, method, args).await
    }

    /// Fire-and-forget invocation that buffers across disconnection.
    ///
    /// # Errors
    /// Fails with `UnknownMethod`.
    pub async fn notify_with_resend(&self, method: &str, args: Vec<Value>) -> Result<(), RpcError> {
        self.ensure_method(method)?;
        self.session
            .notify_with_resend(&self.interface, method, args)
            .await
    }

    /// Emit an event: local subscribers are notified synchronously, and the
    /// event is retranslated to the peer so its mirrored proxy observes the
    /// same data. One hop only; the peer will not echo it back.
    pub fn emit(&self, event: &str, args: Value) {
        self.session.emit_event(&self.interface, event, args, true);
    }

    /// Emit an event to local subscribers only; no event packet leaves the
    /// process.
    pub fn emit_local(&self, event: &str, args: Value) {
        self.session.emit_event(&self.interface, event, args, false);
    }

    /// Subscribe to this interface's events, local and remote alike.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<RemoteEvent> {
        self.session.events().subscribe(&self.interface)
    }

    /// Event stream view over [`subscribe`](Self::subscribe); lagged
    /// receivers skip silently.
    #[must_use]
    pub fn event_stream(&self) -> futures::stream::BoxStream<'static, RemoteEvent> {
        BroadcastStream::new(self.subscribe())
            .filter_map(|res| async move { res.ok() })
            .boxed()
    }
}
