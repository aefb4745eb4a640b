//! Push (broadcast) delivery for Relay.
//!
//! Fans one outbound packet out to a set of identities via registry
//! lookups. Offline targets are skipped; they catch up through the pull
//! path. Persistence never happens here — sequencing precedes broadcast.

use std::sync::Arc;

use futures_util::future::join_all;
use relay_protocol::Packet;
use thiserror::Error;
use tracing::{debug, trace};

use crate::registry::{Registry, SessionError};

/// Aggregate failure from a broadcast.
///
/// Produced only after every target has been attempted, so a caller can
/// retry at the identity level without re-sending to identities that
/// already succeeded. Absent targets never contribute a failure.
#[derive(Debug, Error)]
#[error("delivery failed for {} target(s)", .failures.len())]
pub struct BroadcastError {
    /// Per-target write failures, in target order.
    pub failures: Vec<(String, SessionError)>,
}

impl BroadcastError {
    /// Identities whose writes failed, in target order.
    #[must_use]
    pub fn failed_identities(&self) -> Vec<&str> {
        self.failures.iter().map(|(id, _)| id.as_str()).collect()
    }
}

/// Fan-out service over the live-connection registry.
#[derive(Clone)]
pub struct PushService {
    registry: Arc<Registry>,
}

impl PushService {
    /// Create a push service over a registry.
    #[must_use]
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// Write `packet` to every connected target.
    ///
    /// Targets without a registered session are skipped silently. Writes
    /// run as joined futures so one slow or failed target neither delays
    /// nor fails the rest; every target is attempted before the aggregate
    /// error (if any) is returned.
    ///
    /// # Errors
    ///
    /// Returns a [`BroadcastError`] collecting every failed write once all
    /// targets have been attempted.
    pub async fn broadcast(
        &self,
        packet: &Packet,
        targets: &[String],
    ) -> Result<(), BroadcastError> {
        let attempts = targets.iter().map(|target| async move {
            let Some(session) = self.registry.get(target) else {
                trace!(target = %target, "target offline, skipped");
                return None;
            };
            match session.send(packet).await {
                Ok(()) => None,
                Err(err) => Some((target.clone(), err)),
            }
        });

        let failures: Vec<(String, SessionError)> =
            join_all(attempts).await.into_iter().flatten().collect();

        if failures.is_empty() {
            Ok(())
        } else {
            debug!(
                failed = failures.len(),
                targets = targets.len(),
                "broadcast completed with failures"
            );
            Err(BroadcastError { failures })
        }
    }
}
