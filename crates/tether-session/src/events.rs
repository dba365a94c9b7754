//! Per-interface event fan-out.
//!
//! Local listeners are notified synchronously through a broadcast channel;
//! retranslation to the peer is the proxy's concern, not the hub's, so an
//! incoming event packet delivered here can never echo back out.

use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use serde_json::Value;
use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// One named event observed on an interface.
#[derive(Debug, Clone)]
pub struct RemoteEvent {
    pub event: String,
    pub args: Value,
}

/// Broadcast hub keyed by interface name.
#[derive(Default)]
pub(crate) struct EventHub {
    channels: RwLock<HashMap<String, broadcast::Sender<RemoteEvent>>>,
}

impl EventHub {
    /// Deliver an event to local subscribers of `interface`. Synchronous;
    /// events with no subscribers are dropped.
    pub fn deliver(&self, interface: &str, event: &str, args: Value) {
        let channels = self
            .channels
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(sender) = channels.get(interface) {
            let _ = sender.send(RemoteEvent {
                event: event.to_string(),
                args,
            });
        }
    }

    /// Subscribe to events on `interface`, creating its channel lazily.
    pub fn subscribe(&self, interface: &str) -> broadcast::Receiver<RemoteEvent> {
        let mut channels = self
            .channels
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(interface.to_string())
            .or_insert_with(|| broadcast::channel(EVENT_CHANNEL_CAPACITY).0)
            .subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deliver_reaches_subscriber() {
        let hub = EventHub::default();
        let mut rx = hub.subscribe("chat");

        hub.deliver("chat", "message", json!({"text": "hi"}));

        let event = rx.try_recv().unwrap();
        assert_eq!(event.event, "message");
        assert_eq!(event.args, json!({"text": "hi"}));
    }

    #[test]
    fn test_interfaces_are_isolated() {
        let hub = EventHub::default();
        let mut chat = hub.subscribe("chat");
        let _log = hub.subscribe("log");

        hub.deliver("log", "line", json!("x"));
        assert!(chat.try_recv().is_err());
    }

    #[test]
    fn test_no_subscribers_is_fine() {
        let hub = EventHub::default();
        hub.deliver("chat", "message", json!(null));
    }
}
