//! Pull (catch-up) delivery for Relay.
//!
//! Disconnected clients page through a conversation's stored timeline with
//! a seq cursor and record how far they have read with a monotonic ack
//! watermark.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::timeline::{StoreError, TimelineMessage, TimelineStore};

/// One page of a conversation's timeline.
#[derive(Debug, Clone, Serialize)]
pub struct PullResult {
    /// Messages with `seq > cursor`, ascending, at most `limit` of them.
    pub messages: Vec<TimelineMessage>,
    /// Cursor for the next page: the seq of the last returned message, or
    /// the input cursor when the batch is empty.
    pub next_cursor_seq: u64,
    /// Whether more messages remain beyond this page.
    pub has_more: bool,
}

/// Cursor-paginated catch-up over the timeline store.
#[derive(Clone)]
pub struct PullService {
    store: Arc<dyn TimelineStore>,
}

impl PullService {
    /// Create a pull service over a timeline store.
    #[must_use]
    pub fn new(store: Arc<dyn TimelineStore>) -> Self {
        Self { store }
    }

    /// Page through a conversation's timeline after `cursor_seq`.
    ///
    /// Fetches `limit + 1` rows to detect whether more remain; an empty
    /// batch echoes the input cursor back.
    ///
    /// # Errors
    ///
    /// Passes through storage failures.
    pub fn pull_messages(
        &self,
        conversation_id: &str,
        cursor_seq: u64,
        limit: usize,
    ) -> Result<PullResult, StoreError> {
        let mut messages = self
            .store
            .list_after_seq(conversation_id, cursor_seq, limit + 1)?;

        let has_more = messages.len() > limit;
        if has_more {
            messages.truncate(limit);
        }
        let next_cursor_seq = messages.last().map_or(cursor_seq, |m| m.seq);

        debug!(
            conversation = %conversation_id,
            cursor = cursor_seq,
            returned = messages.len(),
            has_more,
            "timeline pulled"
        );

        Ok(PullResult {
            messages,
            next_cursor_seq,
            has_more,
        })
    }

    /// Record that `user_id` has read up to `ack_seq` in a conversation.
    ///
    /// The stored watermark only ever moves forward; an acknowledgment at
    /// or below the stored value is a no-op.
    ///
    /// # Errors
    ///
    /// Passes through storage failures.
    pub fn ack_conversation(
        &self,
        user_id: &str,
        conversation_id: &str,
        ack_seq: i64,
    ) -> Result<(), StoreError> {
        self.store.upsert_ack_max(user_id, conversation_id, ack_seq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeline::{NewMessage, DEFAULT_MSG_TYPE};
    use std::sync::Mutex;

    /// Minimal in-memory store exercising only the pull-side contract.
    struct FixedStore {
        rows: Vec<TimelineMessage>,
        acks: Mutex<Vec<(String, String, i64)>>,
    }

    impl FixedStore {
        fn with_seqs(conversation_id: &str, seqs: &[u64]) -> Arc<Self> {
            let rows = seqs
                .iter()
                .map(|&seq| TimelineMessage {
                    msg_id: format!("{conversation_id}-m{seq}"),
                    conversation_id: conversation_id.to_string(),
                    seq,
                    sender_id: "u1".into(),
                    content: "c".into(),
                    msg_type: DEFAULT_MSG_TYPE,
                    status: 0,
                    send_time: 0,
                    created_at: "2026-08-06T00:00:00Z".into(),
                })
                .collect();
            Arc::new(Self {
                rows,
                acks: Mutex::new(Vec::new()),
            })
        }
    }

    impl TimelineStore for FixedStore {
        fn append_message(&self, _draft: &NewMessage) -> Result<TimelineMessage, StoreError> {
            unimplemented!("not exercised by pull tests")
        }

        fn find_by_msg_id(&self, msg_id: &str) -> Result<TimelineMessage, StoreError> {
            Err(StoreError::NotFound(format!("message {msg_id}")))
        }

        fn list_after_seq(
            &self,
            conversation_id: &str,
            after_seq: u64,
            limit: usize,
        ) -> Result<Vec<TimelineMessage>, StoreError> {
            Ok(self
                .rows
                .iter()
                .filter(|m| m.conversation_id == conversation_id && m.seq > after_seq)
                .take(limit)
                .cloned()
                .collect())
        }

        fn upsert_ack_max(
            &self,
            user_id: &str,
            conversation_id: &str,
            ack_seq: i64,
        ) -> Result<(), StoreError> {
            self.acks.lock().unwrap().push((
                user_id.to_string(),
                conversation_id.to_string(),
                ack_seq,
            ));
            Ok(())
        }
    }

    #[test]
    fn test_pull_no_more() {
        let store = FixedStore::with_seqs("c1", &[1, 2, 3]);
        let pull = PullService::new(store);

        let res = pull.pull_messages("c1", 0, 50).unwrap();
        assert_eq!(res.messages.len(), 3);
        assert!(!res.has_more);
        assert_eq!(res.next_cursor_seq, 3);
    }

    #[test]
    fn test_pull_with_more() {
        let store = FixedStore::with_seqs("c2", &[5, 6, 7, 8, 9]);
        let pull = PullService::new(store);

        let res = pull.pull_messages("c2", 5, 2).unwrap();
        assert_eq!(res.messages.len(), 2);
        assert!(res.has_more);
        assert_eq!(res.next_cursor_seq, 7);
    }

    #[test]
    fn test_pull_exact_limit_boundary() {
        let store = FixedStore::with_seqs("c3", &[1, 2]);
        let pull = PullService::new(store);

        // Exactly `limit` remaining: no more pages.
        let res = pull.pull_messages("c3", 0, 2).unwrap();
        assert_eq!(res.messages.len(), 2);
        assert!(!res.has_more);
        assert_eq!(res.next_cursor_seq, 2);
    }

    #[test]
    fn test_pull_empty_batch_echoes_cursor() {
        let store = FixedStore::with_seqs("c4", &[]);
        let pull = PullService::new(store);

        let res = pull.pull_messages("c4", 17, 50).unwrap();
        assert!(res.messages.is_empty());
        assert!(!res.has_more);
        assert_eq!(res.next_cursor_seq, 17);
    }

    #[test]
    fn test_ack_delegates_to_store() {
        let store = FixedStore::with_seqs("c5", &[]);
        let pull = PullService::new(store.clone());

        pull.ack_conversation("u1", "c5", 10).unwrap();
        let acks = store.acks.lock().unwrap();
        assert_eq!(*acks, vec![("u1".to_string(), "c5".to_string(), 10)]);
    }
}
