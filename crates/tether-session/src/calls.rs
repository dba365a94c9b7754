//! Outstanding-call bookkeeping: correlation table plus resend queue.
//!
//! A [`CallRecord`] exists from the moment a call is accepted until it is
//! confirmed (`Acked`) or permanently failed. Records move forward through
//! `Pending -> Sent -> {Acked, Failed}`; the single sanctioned exception is
//! the `Sent -> Pending` revert on connection loss, which reclassifies an
//! unconfirmed transmission as not-yet-delivered so a later flush resends it
//! without duplication.

use std::collections::{HashMap, VecDeque};

use serde_json::Value;
use tokio::sync::oneshot;

use tether_core::{CorrelationId, Packet, RpcError};

/// Delivery state of one outstanding call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    /// Accepted, not yet on the wire.
    Pending,
    /// Transmitted, awaiting the peer's callback.
    Sent,
    /// Terminal: resolved by a callback.
    Acked,
    /// Terminal: timed out, abandoned, or failed by the peer.
    Failed,
}

/// Channel resolving the caller's awaited result. `None` for fire-and-forget.
pub(crate) type Completion = oneshot::Sender<Result<Value, RpcError>>;

pub(crate) struct CallRecord {
    pub correlation_id: CorrelationId,
    pub interface: String,
    pub method: String,
    pub args: Vec<Value>,
    pub completion: Option<Completion>,
    pub resendable: bool,
    pub state: CallState,
}

impl CallRecord {
    fn call_packet(&self) -> Packet {
        Packet::call(
            self.correlation_id,
            self.interface.clone(),
            self.method.clone(),
            self.args.clone(),
        )
    }
}

/// Correlation table and FIFO resend queue for one session.
///
/// Correlation ids are monotonic and never reused within the session. The
/// queue reflects issuance order; replay after reattach preserves it.
pub(crate) struct CallRegistry {
    next_id: CorrelationId,
    records: HashMap<CorrelationId, CallRecord>,
    order: VecDeque<CorrelationId>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            records: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Insert a new record in `Pending` state. Non-blocking.
    pub fn register(
        &mut self,
        interface: String,
        method: String,
        args: Vec<Value>,
        completion: Option<Completion>,
        resendable: bool,
    ) -> CorrelationId {
        let correlation_id = self.next_id;
        self.next_id += 1;

        self.records.insert(
            correlation_id,
            CallRecord {
                correlation_id,
                interface,
                method,
                args,
                completion,
                resendable,
                state: CallState::Pending,
            },
        );
        self.order.push_back(correlation_id);
        correlation_id
    }

    /// Build the wire packet for a record, if it is still outstanding.
    pub fn call_packet(&self, id: CorrelationId) -> Option<Packet> {
        self.records.get(&id).map(CallRecord::call_packet)
    }

    pub fn state(&self, id: CorrelationId) -> Option<CallState> {
        self.records.get(&id).map(|r| r.state)
    }

    /// Transition `Pending -> Sent`. Each record is transmitted exactly once
    /// per `Sent` transition; an `Acked` record is never resent.
    pub fn mark_sent(&mut self, id: CorrelationId) {
        if let Some(record) = self.records.get_mut(&id) {
            debug_assert_eq!(record.state, CallState::Pending);
            record.state = CallState::Sent;
        }
    }

    /// Resolve a record with the peer's result, delivering its completion.
    ///
    /// # Errors
    /// Returns `UnknownCorrelation` if no such record is outstanding (late or
    /// duplicate callback); the caller logs and discards it.
    pub fn resolve(&mut self, id: CorrelationId, value: Value) -> Result<(), RpcError> {
        let mut record = self
            .records
            .remove(&id)
            .ok_or(RpcError::UnknownCorrelation(id))?;
        record.state = CallState::Acked;
        self.order.retain(|queued| *queued != id);
        if let Some(completion) = record.completion.take() {
            let _ = completion.send(Ok(value));
        }
        Ok(())
    }

    /// Fail a record, delivering the error to its completion.
    ///
    /// # Errors
    /// Returns `UnknownCorrelation` if no such record is outstanding.
    pub fn fail(&mut self, id: CorrelationId, error: RpcError) -> Result<(), RpcError> {
        let mut record = self
            .records
            .remove(&id)
            .ok_or(RpcError::UnknownCorrelation(id))?;
        record.state = CallState::Failed;
        self.order.retain(|queued| *queued != id);
        if let Some(completion) = record.completion.take() {
            let _ = completion.send(Err(error));
        }
        Ok(())
    }

    /// Bookkeeping for a lost connection.
    ///
    /// Unconfirmed resendable transmissions revert to `Pending` (order
    /// preserved); every non-resendable outstanding record fails with
    /// `SessionLost` immediately.
    pub fn on_disconnect(&mut self) {
        let ids: Vec<CorrelationId> = self.order.iter().copied().collect();
        for id in ids {
            let Some(resendable) = self.records.get(&id).map(|r| r.resendable) else {
                continue;
            };
            if resendable {
                if let Some(record) = self.records.get_mut(&id) {
                    if record.state == CallState::Sent {
                        record.state = CallState::Pending;
                    }
                }
            } else {
                let _ = self.fail(id, RpcError::SessionLost);
            }
        }
    }

    /// Outstanding `Pending` records, in issuance order.
    pub fn pending_in_order(&self) -> Vec<CorrelationId> {
        self.order
            .iter()
            .copied()
            .filter(|id| {
                self.records
                    .get(id)
                    .is_some_and(|r| r.state == CallState::Pending)
            })
            .collect()
    }

    pub fn is_resendable(&self, id: CorrelationId) -> bool {
        self.records.get(&id).is_some_and(|r| r.resendable)
    }

    #[cfg(test)]
    pub fn outstanding(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn register(registry: &mut CallRegistry, resendable: bool) -> CorrelationId {
        registry.register(
            "iface".to_string(),
            "method".to_string(),
            vec![json!(1)],
            None,
            resendable,
        )
    }

    #[test]
    fn test_correlation_ids_monotonic() {
        let mut registry = CallRegistry::new();
        let a = register(&mut registry, true);
        let b = register(&mut registry, true);
        assert!(b > a);
    }

    #[test]
    fn test_resolve_is_terminal() {
        let mut registry = CallRegistry::new();
        let id = register(&mut registry, false);
        registry.mark_sent(id);
        registry.resolve(id, json!("ok")).unwrap();

        // A duplicate callback is an addressing failure, not a second delivery.
        let err = registry.resolve(id, json!("again")).unwrap_err();
        assert!(matches!(err, RpcError::UnknownCorrelation(_)));
        assert_eq!(registry.outstanding(), 0);
    }

    #[test]
    fn test_completion_receives_exactly_one_result() {
        let mut registry = CallRegistry::new();
        let (tx, mut rx) = oneshot::channel();
        let id = registry.register(
            "iface".to_string(),
            "m".to_string(),
            vec![],
            Some(tx),
            false,
        );
        registry.mark_sent(id);
        registry.fail(id, RpcError::CallTimeout).unwrap();

        let result = rx.try_recv().unwrap();
        assert!(matches!(result, Err(RpcError::CallTimeout)));
        assert!(registry.fail(id, RpcError::CallTimeout).is_err());
    }

    #[test]
    fn test_disconnect_reverts_resendable_and_fails_rest() {
        let mut registry = CallRegistry::new();
        let keep = register(&mut registry, true);
        let (tx, mut rx) = oneshot::channel();
        let drop_id = registry.register(
            "iface".to_string(),
            "m".to_string(),
            vec![],
            Some(tx),
            false,
        );
        registry.mark_sent(keep);
        registry.mark_sent(drop_id);

        registry.on_disconnect();

        assert_eq!(registry.state(keep), Some(CallState::Pending));
        assert_eq!(registry.state(drop_id), None);
        assert!(matches!(rx.try_recv().unwrap(), Err(RpcError::SessionLost)));
    }

    #[test]
    fn test_pending_order_is_fifo_across_revert() {
        let mut registry = CallRegistry::new();
        let a = register(&mut registry, true);
        let b = register(&mut registry, true);
        registry.mark_sent(a);
        registry.mark_sent(b);
        registry.on_disconnect();

        assert_eq!(registry.pending_in_order(), vec![a, b]);
    }
}
