//! Timeline records and the durable-storage seam.
//!
//! The timeline is the per-conversation ordered log every delivery
//! guarantee hangs off: the sequencer appends to it, the pull service
//! paginates it, and the ack watermark tracks how far each user has read.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default message-type discriminator (plain chat text).
pub const DEFAULT_MSG_TYPE: i32 = 1;

/// A durable timeline record. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineMessage {
    /// Globally unique, client-assigned message identifier.
    pub msg_id: String,
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Per-conversation position, dense and starting at 1.
    pub seq: u64,
    /// Sender identity.
    pub sender_id: String,
    /// Content payload.
    pub content: String,
    /// Message-type discriminator.
    pub msg_type: i32,
    /// Delivery/status discriminator; updated by outside processes only.
    pub status: i32,
    /// Client-supplied send timestamp (epoch millis).
    pub send_time: i64,
    /// Server-assigned creation timestamp (RFC 3339).
    pub created_at: String,
}

/// An inbound message awaiting its seq assignment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    /// Globally unique, client-assigned message identifier.
    pub msg_id: String,
    /// Conversation the message belongs to.
    pub conversation_id: String,
    /// Sender identity.
    pub sender_id: String,
    /// Content payload.
    pub content: String,
    /// Message-type discriminator.
    pub msg_type: i32,
    /// Client-supplied send timestamp (epoch millis).
    pub send_time: i64,
}

/// Storage-collaborator errors.
///
/// Duplicate and not-found are their own variants so callers can branch on
/// them without string matching; everything else passes through as
/// `Database`.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The message identifier already exists; the original row is kept.
    #[error("duplicate msg_id: {0}")]
    DuplicateMsgId(String),

    /// No record matched the lookup.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying storage failure, passed through untranslated.
    #[error("database error: {0}")]
    Database(String),
}

/// Durable timeline storage.
///
/// Implementations must make `append_message` atomic per conversation: no
/// two concurrent writers may observe the same next seq, and a duplicate
/// `msg_id` must be rejected without touching the stored row even under
/// concurrent submission.
pub trait TimelineStore: Send + Sync {
    /// Assign the next per-conversation seq and insert the record in the
    /// same unit of work. Returns the stored record carrying the assigned
    /// seq and the server creation timestamp.
    ///
    /// # Errors
    ///
    /// [`StoreError::DuplicateMsgId`] when the identifier already exists
    /// (in any conversation); [`StoreError::Database`] otherwise.
    fn append_message(&self, draft: &NewMessage) -> Result<TimelineMessage, StoreError>;

    /// Look up a record by its message identifier.
    ///
    /// # Errors
    ///
    /// [`StoreError::NotFound`] when no record matches.
    fn find_by_msg_id(&self, msg_id: &str) -> Result<TimelineMessage, StoreError>;

    /// Records with `seq > after_seq` for a conversation, ascending, at
    /// most `limit` rows.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] on storage failure.
    fn list_after_seq(
        &self,
        conversation_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<TimelineMessage>, StoreError>;

    /// Upsert the `(user_id, conversation_id)` watermark with
    /// `last_ack_seq = max(existing, ack_seq)`. Never decreases the stored
    /// value; creates the row on first acknowledgment.
    ///
    /// # Errors
    ///
    /// [`StoreError::Database`] on storage failure.
    fn upsert_ack_max(
        &self,
        user_id: &str,
        conversation_id: &str,
        ack_seq: i64,
    ) -> Result<(), StoreError>;
}
