//! Registered interface lookup for inbound calls.
//!
//! The registry is passed to a dispatcher as an explicit collaborator rather
//! than living in process-wide state, so multiple independent sessions and
//! dispatchers can coexist in one process.

use std::{collections::HashMap, sync::Arc};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::error::RpcError;
use crate::packet::WireError;

/// Future returned by a method handler. Resolves exactly once.
pub type HandlerFuture = BoxFuture<'static, Result<Value, WireError>>;

/// A registered method implementation.
pub type Handler = Arc<dyn Fn(Vec<Value>) -> HandlerFuture + Send + Sync>;

/// One named interface: a fixed set of method handlers.
pub struct Interface {
    name: String,
    methods: HashMap<String, Handler>,
}

impl Interface {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Add a method handler. Builder-style.
    #[must_use]
    pub fn method<F, Fut>(mut self, name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, WireError>> + Send + 'static,
    {
        self.methods
            .insert(name.into(), Arc::new(move |args| Box::pin(handler(args))));
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Names of all registered methods.
    #[must_use]
    pub fn method_names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }
}

/// Lookup table from `(interface, method)` to handler.
#[derive(Default)]
pub struct InterfaceRegistry {
    interfaces: HashMap<String, Interface>,
}

impl InterfaceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an interface. Builder-style.
    #[must_use]
    pub fn register(mut self, interface: Interface) -> Self {
        self.interfaces.insert(interface.name.clone(), interface);
        self
    }

    /// Resolve a handler for an inbound call.
    ///
    /// # Errors
    /// Returns `UnknownInterface` or `UnknownMethod` if absent.
    pub fn lookup(&self, interface: &str, method: &str) -> Result<Handler, RpcError> {
        let iface = self
            .interfaces
            .get(interface)
            .ok_or_else(|| RpcError::UnknownInterface(interface.to_string()))?;
        iface
            .methods
            .get(method)
            .cloned()
            .ok_or_else(|| RpcError::UnknownMethod(format!("{interface}.{method}")))
    }

    /// Method names of a registered interface, if present.
    #[must_use]
    pub fn method_names(&self, interface: &str) -> Option<Vec<String>> {
        self.interfaces.get(interface).map(Interface::method_names)
    }
}
