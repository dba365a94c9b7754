//! Reconnect-durable session identity and the delivery state machine.
//!
//! A session is created at the first successful handshake and reused across
//! reconnect attempts under a stable token. Exactly one connection may be
//! attached at a time; attaching supersedes the previous connection, then
//! flushes the pending queue in issuance order. All bookkeeping mutations go
//! through one `Mutex`, and no transition awaits I/O mid-flight, so
//! `Pending -> Sent -> terminal` steps are atomic with respect to each other.

use std::{
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use serde_json::Value;
use tokio::sync::{Mutex, mpsc, oneshot};
use uuid::Uuid;

use tether_core::{
    CallOutcome, CorrelationId, InterfaceRegistry, Packet, ProtocolError, RpcError, Serializer,
    SharedSerializer, TransportError, transport::BoxTransport,
};

use crate::calls::CallRegistry;
use crate::connection::{Connection, Inbound};
use crate::dispatcher::Dispatcher;
use crate::events::EventHub;

/// Tunables for call delivery and session expiry.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline for a call to resolve, measured from acceptance. Expiry fails
    /// the call with `CallTimeout`. Connection loss is handled separately:
    /// lost-in-transit defers to resend, took-too-long gives up.
    pub call_timeout: Duration,
    /// How long a detached session survives in a pool before `sweep` drops it.
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            session_ttl: Duration::from_secs(600),
        }
    }
}

struct SessionInner {
    connection: Option<Arc<Connection>>,
    calls: CallRegistry,
}

/// Reconnect-durable identity grouping a sequence of connections and the
/// calls that survive across them.
pub struct Session {
    token: Uuid,
    config: SessionConfig,
    dispatcher: Dispatcher,
    events: EventHub,
    inner: Mutex<SessionInner>,
    /// Mirror of `inner.connection` for synchronous readers (event emission,
    /// `is_connected`). Written only while `inner` is locked.
    current: RwLock<Option<Arc<Connection>>>,
}

impl Session {
    pub(crate) fn with_token(
        token: Uuid,
        registry: Arc<InterfaceRegistry>,
        config: SessionConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            token,
            config,
            dispatcher: Dispatcher::new(registry),
            events: EventHub::default(),
            inner: Mutex::new(SessionInner {
                connection: None,
                calls: CallRegistry::new(),
            }),
            current: RwLock::new(None),
        })
    }

    /// Stable token identifying this session across reconnects.
    #[must_use]
    pub fn token(&self) -> Uuid {
        self.token
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|c| c.is_open())
    }

    pub(crate) fn events(&self) -> &EventHub {
        &self.events
    }

    /// Re-establish this session over a fresh transport.
    ///
    /// Presents the existing token during the handshake so the peer reattaches
    /// its side, then supersedes any live connection and flushes the pending
    /// queue.
    ///
    /// # Errors
    /// Returns error if the handshake fails or the peer resumes a different
    /// session.
    pub async fn reconnect(
        self: &Arc<Self>,
        mut transport: BoxTransport,
        serializer: SharedSerializer,
    ) -> Result<(), RpcError> {
        let token = client_handshake(&mut transport, serializer.as_ref(), Some(self.token)).await?;
        if token != self.token {
            return Err(
                ProtocolError::Handshake(format!("peer resumed a different session: {token}"))
                    .into(),
            );
        }
        self.attach_transport(transport, serializer).await;
        Ok(())
    }

    /// Close the current connection and detach.
    ///
    /// Resendable calls left unconfirmed revert to pending for the next
    /// flush; non-resendable outstanding calls fail with `SessionLost`. The
    /// pending queue itself always survives.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        let Some(connection) = inner.connection.take() else {
            return;
        };
        self.set_current(None);
        connection.close();
        inner.calls.on_disconnect();
    }

    /// Call a remote method and await its result. Fails fast with
    /// `NotConnected` when no connection is attached.
    ///
    /// # Errors
    /// Surfaces the peer's error, `CallTimeout`, or a delivery failure.
    pub async fn call_method(
        self: &Arc<Self>,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let rx = self.start_call(interface, method, args, true, false).await?;
        await_completion(rx).await
    }

    /// Call a remote method, buffering across disconnection. The call is
    /// delivered exactly once after the session reattaches.
    ///
    /// # Errors
    /// Surfaces the peer's error or `CallTimeout`.
    pub async fn call_method_with_resend(
        self: &Arc<Self>,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<Value, RpcError> {
        let rx = self.start_call(interface, method, args, true, true).await?;
        await_completion(rx).await
    }

    /// Fire-and-forget call: delivered like any call, but no result is
    /// awaited and no completion is registered.
    ///
    /// # Errors
    /// Fails fast with `NotConnected` when no connection is attached.
    pub async fn notify(
        self: &Arc<Self>,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), RpcError> {
        self.start_call(interface, method, args, false, false)
            .await?;
        Ok(())
    }

    /// Fire-and-forget call that buffers across disconnection.
    ///
    /// # Errors
    /// Only fails on local bookkeeping errors; delivery is best-effort until
    /// the record is acknowledged or times out.
    pub async fn notify_with_resend(
        self: &Arc<Self>,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Result<(), RpcError> {
        self.start_call(interface, method, args, false, true)
            .await?;
        Ok(())
    }

    /// Register a call, send it if a connection is attached, and arm its
    /// timeout. Bookkeeping happens under the session lock without awaiting
    /// transport I/O.
    async fn start_call(
        self: &Arc<Self>,
        interface: &str,
        method: &str,
        args: Vec<Value>,
        want_result: bool,
        resendable: bool,
    ) -> Result<Option<oneshot::Receiver<Result<Value, RpcError>>>, RpcError> {
        let mut inner = self.inner.lock().await;
        if inner.connection.is_none() && !resendable {
            return Err(RpcError::NotConnected);
        }

        let (completion, rx) = if want_result {
            let (tx, rx) = oneshot::channel();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        let id = inner.calls.register(
            interface.to_string(),
            method.to_string(),
            args,
            completion,
            resendable,
        );
        self.spawn_timeout(id);

        if let Some(connection) = inner.connection.clone() {
            if let Some(packet) = inner.calls.call_packet(id) {
                inner.calls.mark_sent(id);
                if connection.send(packet).is_err() {
                    if resendable {
                        // Raced with connection close; the detach path will
                        // revert this record to pending.
                    } else {
                        let _ = inner.calls.fail(id, RpcError::NotConnected);
                        if rx.is_none() {
                            return Err(RpcError::NotConnected);
                        }
                    }
                }
            }
        }

        Ok(rx)
    }

    fn spawn_timeout(self: &Arc<Self>, id: CorrelationId) {
        let session = Arc::clone(self);
        let timeout = self.config.call_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            session.expire_call(id).await;
        });
    }

    async fn expire_call(&self, id: CorrelationId) {
        let mut inner = self.inner.lock().await;
        if inner.calls.state(id).is_some() {
            tracing::debug!(correlation_id = id, "call timed out");
            let _ = inner.calls.fail(id, RpcError::CallTimeout);
        }
    }

    async fn handle_callback(&self, id: CorrelationId, outcome: CallOutcome) {
        let result = {
            let mut inner = self.inner.lock().await;
            match outcome {
                CallOutcome::Ok { value } => inner.calls.resolve(id, value),
                CallOutcome::Err { error } => inner.calls.fail(id, error.into()),
            }
        };
        if let Err(e) = result {
            // Late callback for an already-resolved or timed-out call.
            tracing::debug!("discarding callback: {e}");
        }
    }

    /// Emit an event on an interface: local subscribers are notified
    /// synchronously; with `retranslate`, an event packet is also sent so the
    /// peer's mirrored proxy observes it. One hop only: incoming events are
    /// delivered without retranslation.
    pub(crate) fn emit_event(&self, interface: &str, event: &str, args: Value, retranslate: bool) {
        if !retranslate {
            self.events.deliver(interface, event, args);
            return;
        }

        self.events.deliver(interface, event, args.clone());
        let connection = self
            .current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        match connection {
            Some(connection) => {
                if let Err(e) = connection.send(Packet::event(interface, event, args)) {
                    tracing::debug!("event not retranslated: {e}");
                }
            }
            None => tracing::debug!("event not retranslated: no connection"),
        }
    }

    pub(crate) async fn attach_transport(
        self: &Arc<Self>,
        transport: BoxTransport,
        serializer: SharedSerializer,
    ) {
        let (connection, inbound) = Connection::establish(transport, serializer);
        self.attach(connection, inbound).await;
    }

    /// Attach a connection: supersede the previous one, start routing, then
    /// flush the pending queue in FIFO order.
    pub(crate) async fn attach(
        self: &Arc<Self>,
        connection: Arc<Connection>,
        inbound: mpsc::UnboundedReceiver<Inbound>,
    ) {
        let mut inner = self.inner.lock().await;
        if let Some(old) = inner.connection.take() {
            // Superseding counts as losing the old connection: unconfirmed
            // resendable records revert to pending before the flush below.
            old.close();
            inner.calls.on_disconnect();
        }
        inner.connection = Some(Arc::clone(&connection));
        self.set_current(Some(Arc::clone(&connection)));
        tokio::spawn(route_loop(Arc::clone(self), connection, inbound));
        self.flush_pending(&mut inner);
    }

    /// Replay pending records in issuance order. Each resendable record is
    /// sent exactly once per `Sent` transition; a non-resendable record found
    /// pending here is failed rather than delivered late.
    fn flush_pending(&self, inner: &mut SessionInner) {
        let Some(connection) = inner.connection.clone() else {
            return;
        };
        for id in inner.calls.pending_in_order() {
            if !inner.calls.is_resendable(id) {
                let _ = inner.calls.fail(id, RpcError::SessionLost);
                continue;
            }
            let Some(packet) = inner.calls.call_packet(id) else {
                continue;
            };
            inner.calls.mark_sent(id);
            if connection.send(packet).is_err() {
                // Connection died mid-flush; detach reverts the sent records.
                break;
            }
        }
    }

    /// Detach bookkeeping, guarded by connection id so a superseded
    /// connection's routing loop cannot detach its successor.
    async fn detach_if_current(&self, connection_id: u64) {
        let mut inner = self.inner.lock().await;
        let is_current = inner
            .connection
            .as_ref()
            .is_some_and(|c| c.id() == connection_id);
        if !is_current {
            return;
        }
        if let Some(connection) = inner.connection.take() {
            connection.close();
        }
        self.set_current(None);
        inner.calls.on_disconnect();
    }

    fn set_current(&self, connection: Option<Arc<Connection>>) {
        *self
            .current
            .write()
            .unwrap_or_else(PoisonError::into_inner) = connection;
    }
}

async fn await_completion(
    rx: Option<oneshot::Receiver<Result<Value, RpcError>>>,
) -> Result<Value, RpcError> {
    let Some(rx) = rx else {
        return Err(RpcError::SessionLost);
    };
    match rx.await {
        Ok(result) => result,
        // The registry was dropped without a terminal resolution.
        Err(_) => Err(RpcError::SessionLost),
    }
}

/// Per-connection routing: callbacks to the call registry, calls to the
/// dispatcher (replying on the delivering connection), events to the local
/// hub. Protocol errors close the connection; either way the session
/// detaches when the stream ends.
async fn route_loop(
    session: Arc<Session>,
    connection: Arc<Connection>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
) {
    while let Some(item) = inbound.recv().await {
        match item {
            Ok(Packet::Callback {
                correlation_id,
                outcome,
            }) => session.handle_callback(correlation_id, outcome).await,
            Ok(Packet::Call {
                correlation_id,
                interface,
                method,
                args,
            }) => {
                // Handlers may suspend; run them off the routing loop so
                // bookkeeping never waits on application code.
                let dispatcher = session.dispatcher.clone();
                let reply_on = Arc::clone(&connection);
                tokio::spawn(async move {
                    let callback = dispatcher
                        .dispatch(correlation_id, &interface, &method, args)
                        .await;
                    if let Err(e) = reply_on.send(callback) {
                        // The delivering connection is gone; the caller's
                        // timeout is the recovery path, not a resend here.
                        tracing::debug!("dropping callback for closed connection: {e}");
                    }
                });
            }
            Ok(Packet::Event {
                interface,
                event,
                args,
            }) => {
                // Incoming events never re-retranslate.
                session.events.deliver(&interface, &event, args);
            }
            Ok(Packet::Handshake { .. }) => {
                tracing::debug!("ignoring handshake after attach");
            }
            Err(e) => {
                tracing::warn!("protocol error, closing connection: {e}");
                connection.close();
                break;
            }
        }
    }
    session.detach_if_current(connection.id()).await;
}

/// Client half of the handshake: present a token (or none for a fresh
/// session) and adopt the token the peer replies with.
async fn client_handshake(
    transport: &mut BoxTransport,
    serializer: &dyn Serializer,
    token: Option<Uuid>,
) -> Result<Uuid, RpcError> {
    let frame = serializer.encode(&Packet::Handshake {
        session_token: token,
    })?;
    transport.send(frame).await.map_err(RpcError::from)?;

    let frame = transport
        .recv()
        .await?
        .ok_or(TransportError::Closed)
        .map_err(RpcError::from)?;
    match serializer.decode(&frame)? {
        Packet::Handshake {
            session_token: Some(token),
        } => Ok(token),
        _ => Err(ProtocolError::Handshake("expected a handshake reply".to_string()).into()),
    }
}

/// Establish a fresh session over an established transport.
///
/// Performs the client half of the handshake, adopts the peer-assigned
/// token, and attaches the connection.
///
/// # Errors
/// Returns error if the handshake fails.
pub async fn connect(
    mut transport: BoxTransport,
    serializer: SharedSerializer,
    registry: Arc<InterfaceRegistry>,
    config: SessionConfig,
) -> Result<Arc<Session>, RpcError> {
    let token = client_handshake(&mut transport, serializer.as_ref(), None).await?;
    let session = Session::with_token(token, registry, config);
    session.attach_transport(transport, serializer).await;
    Ok(session)
}
