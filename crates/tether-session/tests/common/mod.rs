//! Shared wiring: a session pool on one end of an in-process pair, a client
//! session on the other.
#![allow(dead_code)]

use std::sync::Arc;

use tether_core::{InterfaceRegistry, JsonSerializer, SharedSerializer};
use tether_session::{Session, SessionConfig, SessionPool, connect};
use tether_transport::pair;

pub fn serializer() -> SharedSerializer {
    Arc::new(JsonSerializer)
}

pub fn pool(registry: InterfaceRegistry, config: SessionConfig) -> Arc<SessionPool> {
    Arc::new(SessionPool::new(Arc::new(registry), config))
}

/// Connect a fresh client session to the pool. Returns (client, server).
pub async fn connect_pair(
    pool: &Arc<SessionPool>,
    config: SessionConfig,
) -> (Arc<Session>, Arc<Session>) {
    let (client_end, server_end) = pair();
    let (client, server) = tokio::join!(
        connect(
            Box::new(client_end),
            serializer(),
            Arc::new(InterfaceRegistry::new()),
            config,
        ),
        pool.accept(Box::new(server_end), serializer()),
    );
    (client.expect("connect"), server.expect("accept"))
}

/// Reattach an existing client session to the pool over a fresh pair.
pub async fn reconnect_pair(pool: &Arc<SessionPool>, session: &Arc<Session>) {
    let (client_end, server_end) = pair();
    let (reconnected, accepted) = tokio::join!(
        session.reconnect(Box::new(client_end), serializer()),
        pool.accept(Box::new(server_end), serializer()),
    );
    reconnected.expect("reconnect");
    accepted.expect("accept");
}
