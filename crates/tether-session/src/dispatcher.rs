//! Inbound-call router: wire packet to registered local handler.

use std::sync::Arc;

use serde_json::Value;

use tether_core::{CorrelationId, InterfaceRegistry, Packet};

/// Resolves inbound calls against an explicit registry and converts each
/// handler outcome into exactly one callback packet.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<InterfaceRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<InterfaceRegistry>) -> Self {
        Self { registry }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<InterfaceRegistry> {
        &self.registry
    }

    /// Invoke the addressed handler and produce the callback packet.
    ///
    /// Addressing failures (`UnknownInterface`, `UnknownMethod`) produce an
    /// error callback without invoking anything. A handler's future resolves
    /// exactly once, so exactly one callback is produced per call.
    pub async fn dispatch(
        &self,
        correlation_id: CorrelationId,
        interface: &str,
        method: &str,
        args: Vec<Value>,
    ) -> Packet {
        let handler = match self.registry.lookup(interface, method) {
            Ok(handler) => handler,
            Err(e) => return Packet::callback_err(correlation_id, e.to_wire()),
        };

        match handler(args).await {
            Ok(value) => Packet::callback_ok(correlation_id, value),
            Err(error) => Packet::callback_err(correlation_id, error),
        }
    }
}
