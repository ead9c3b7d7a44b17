use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use multiroom_core::ConnectionId;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    #[error("connection closed")]
    Closed,

    #[error("write timed out")]
    Timeout,

    #[error("write failed: {0}")]
    Write(String),
}

/// Outbound half of a live duplex client connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Write one outbound frame.
    async fn send(&self, payload: &[u8]) -> Result<(), ConnectionError>;

    /// Release the transport. Must be safe to call more than once.
    async fn close(&self);
}

/// Opaque connection handle with a unique identity.
///
/// Equality and hashing use the identity only, so a handle can be used for
/// set membership and removal.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    inner: Arc<dyn Connection>,
}

impl ConnectionHandle {
    pub fn new(inner: Arc<dyn Connection>) -> Self {
        Self {
            id: ConnectionId::new(),
            inner,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), ConnectionError> {
        self.inner.send(payload).await
    }

    pub async fn close(&self) {
        self.inner.close().await
    }
}

impl PartialEq for ConnectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ConnectionHandle {}

impl core::hash::Hash for ConnectionHandle {
    fn hash<H: core::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl core::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ConnectionHandle").field("id", &self.id).finish()
    }
}
