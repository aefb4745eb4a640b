//! Message sequencer.
//!
//! Assigns each inbound message its durable position inside its
//! conversation. Per-conversation seq is the ordering primitive the pull
//! cursor and client render order depend on; global uniqueness of the
//! client-assigned `msg_id` is what makes client retries idempotent.

use std::sync::Arc;

use tracing::debug;

use crate::timeline::{NewMessage, StoreError, TimelineMessage, TimelineStore};

/// Ordered, idempotent writer over the timeline store.
#[derive(Clone)]
pub struct Sequencer {
    store: Arc<dyn TimelineStore>,
}

impl Sequencer {
    /// Create a sequencer over a timeline store.
    #[must_use]
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    /// Persist a message, assigning the next seq in its conversation.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateMsgId`] when the identifier was already
    /// recorded — callers treat that as "already recorded", not as a
    /// failure to retry.
    pub fn save_message(&self, draft: NewMessage) -> Result<TimelineMessage, StoreError> {
        let saved = self.store.append_message(&draft)?;
        debug!(
            msg_id = %saved.msg_id,
            conversation = %saved.conversation_id,
            seq = saved.seq,
            "message sequenced"
        );
        Ok(saved)
    }

    /// Look up a stored message by its identifier.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no record matches.
    pub fn find_by_message_id(&self, msg_id: &str) -> Result<TimelineMessage, StoreError> {
        self.store.find_by_msg_id(msg_id)
    }
}
