//! Live-connection registry for Relay.
//!
//! The registry is the single in-memory table of who is online: one session
//! handle per identity, replaced on reconnect, removed on close.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use relay_protocol::{Packet, ProtocolError};
use thiserror::Error;
use tracing::debug;

/// Errors from writing to a session.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session is closed.
    #[error("session closed")]
    Closed,

    /// The write did not complete within the write timeout.
    #[error("write timed out")]
    Timeout,

    /// The transport rejected the write.
    #[error("write failed: {0}")]
    Send(String),

    /// The packet could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] ProtocolError),
}

/// A write-capable transport endpoint bound to one identity.
///
/// Implementations own the outbound half of the connection and must bound
/// every write with a timeout; a handle stays usable from many tasks at
/// once, so writes take `&self`.
#[async_trait]
pub trait Session: Send + Sync {
    /// The identity this session is bound to.
    fn identity(&self) -> &str;

    /// Write a packet to the peer under the session's write timeout.
    async fn send(&self, packet: &Packet) -> Result<(), SessionError>;

    /// Close the session. Best-effort; errors are swallowed.
    async fn close(&self);
}

/// A shared session handle.
pub type SharedSession = Arc<dyn Session>;

/// Identity-keyed table of live sessions.
///
/// All operations are safe for concurrent use; lookups never block on I/O
/// and are only ever blocked by a concurrent write to the same shard.
#[derive(Default)]
pub struct Registry {
    sessions: DashMap<String, SharedSession>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session for an identity.
    ///
    /// If the identity already has a session, the previous handle is closed
    /// (best-effort) after being replaced; lookups observe either the old
    /// or the new handle, never an absent intermediate state.
    pub async fn add(&self, identity: impl Into<String>, session: SharedSession) {
        let identity = identity.into();
        let previous = self.sessions.insert(identity.clone(), session);
        if let Some(old) = previous {
            debug!(identity = %identity, "replacing existing session");
            old.close().await;
        }
    }

    /// Close and remove the session for an identity, if present.
    pub async fn remove(&self, identity: &str) {
        if let Some((_, session)) = self.sessions.remove(identity) {
            session.close().await;
            debug!(identity = %identity, "session removed");
        }
    }

    /// Close and remove the entry for an identity only while it still maps
    /// to the given handle.
    ///
    /// Session read loops deregister through this so that a loop whose
    /// handle was already replaced by a reconnect cannot evict its
    /// successor. Returns `true` if the entry was removed.
    pub async fn remove_if_current(&self, identity: &str, session: &SharedSession) -> bool {
        let removed = self
            .sessions
            .remove_if(identity, |_, current| Arc::ptr_eq(current, session));
        match removed {
            Some((_, old)) => {
                old.close().await;
                debug!(identity = %identity, "session deregistered");
                true
            }
            None => false,
        }
    }

    /// Look up the current session for an identity.
    ///
    /// Returns only the handle; never blocks on I/O.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<SharedSession> {
        self.sessions.get(identity).map(|entry| entry.value().clone())
    }

    /// Snapshot of currently registered identities. Order is unspecified.
    #[must_use]
    pub fn identities(&self) -> Vec<String> {
        self.sessions.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
