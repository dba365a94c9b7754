//! Server-side session pool: handshake, resume-by-token, expiry.

use std::{collections::HashMap, sync::Arc, time::Instant};

use tokio::sync::RwLock;
use uuid::Uuid;

use tether_core::{
    InterfaceRegistry, Packet, ProtocolError, RpcError, SharedSerializer, TransportError,
    transport::BoxTransport,
};

use crate::session::{Session, SessionConfig};

struct PoolEntry {
    session: Arc<Session>,
    last_seen: Instant,
}

/// Accepts transports, resumes or creates sessions by token, and expires
/// sessions that stay detached past the configured TTL.
pub struct SessionPool {
    registry: Arc<InterfaceRegistry>,
    config: SessionConfig,
    sessions: RwLock<HashMap<Uuid, PoolEntry>>,
}

impl SessionPool {
    #[must_use]
    pub fn new(registry: Arc<InterfaceRegistry>, config: SessionConfig) -> Self {
        Self {
            registry,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Perform the server half of the handshake over an accepted transport
    /// and attach the resulting connection.
    ///
    /// The first frame must be a handshake. A presented token resumes the
    /// matching session (or recreates it under the same token if it has
    /// expired); no token creates a fresh session. Either way the reply
    /// carries the session's token, and any connection previously attached to
    /// that session is superseded.
    ///
    /// # Errors
    /// Returns error if the transport fails or the first packet is not a
    /// handshake.
    pub async fn accept(
        &self,
        mut transport: BoxTransport,
        serializer: SharedSerializer,
    ) -> Result<Arc<Session>, RpcError> {
        let frame = transport
            .recv()
            .await?
            .ok_or(TransportError::Closed)
            .map_err(RpcError::from)?;
        let Packet::Handshake { session_token } = serializer.decode(&frame)? else {
            transport.close().await;
            return Err(
                ProtocolError::Handshake("expected a handshake as first packet".to_string())
                    .into(),
            );
        };

        let session = self.resume_or_create(session_token).await;

        let reply = serializer.encode(&Packet::Handshake {
            session_token: Some(session.token()),
        })?;
        transport.send(reply).await.map_err(RpcError::from)?;

        session.attach_transport(transport, serializer).await;
        Ok(session)
    }

    async fn resume_or_create(&self, token: Option<Uuid>) -> Arc<Session> {
        let mut sessions = self.sessions.write().await;
        let token = token.unwrap_or_else(Uuid::new_v4);

        let entry = sessions.entry(token).or_insert_with(|| PoolEntry {
            session: Session::with_token(token, Arc::clone(&self.registry), self.config),
            last_seen: Instant::now(),
        });
        entry.last_seen = Instant::now();
        Arc::clone(&entry.session)
    }

    /// Session currently pooled under `token`, if any.
    pub async fn get(&self, token: Uuid) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .await
            .get(&token)
            .map(|e| Arc::clone(&e.session))
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Drop sessions that have stayed detached past the TTL. Returns how many
    /// were removed. Connected sessions are never swept.
    pub async fn sweep(&self) -> usize {
        let ttl = self.config.session_ttl;
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, entry| {
            entry.session.is_connected() || entry.last_seen.elapsed() < ttl
        });
        before - sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn pool(ttl: Duration) -> SessionPool {
        SessionPool::new(
            Arc::new(InterfaceRegistry::new()),
            SessionConfig {
                session_ttl: ttl,
                ..SessionConfig::default()
            },
        )
    }

    #[tokio::test]
    async fn test_resume_returns_same_session() {
        let pool = pool(Duration::from_secs(60));
        let first = pool.resume_or_create(None).await;
        let resumed = pool.resume_or_create(Some(first.token())).await;
        assert_eq!(first.token(), resumed.token());
        assert_eq!(pool.len().await, 1);
    }

    #[tokio::test]
    async fn test_sweep_drops_expired_detached_sessions() {
        let pool = pool(Duration::ZERO);
        let session = pool.resume_or_create(None).await;
        assert!(!session.is_connected());

        let swept = pool.sweep().await;
        assert_eq!(swept, 1);
        assert!(pool.is_empty().await);
    }

    #[tokio::test]
    async fn test_sweep_keeps_fresh_sessions() {
        let pool = pool(Duration::from_secs(60));
        let _session = pool.resume_or_create(None).await;
        assert_eq!(pool.sweep().await, 0);
        assert_eq!(pool.len().await, 1);
    }
}
