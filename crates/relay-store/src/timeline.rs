//! SQLite implementation of the timeline storage collaborator.

use chrono::Utc;
use relay_core::{NewMessage, StoreError, TimelineMessage, TimelineStore};
use rusqlite::{params, OptionalExtension, Row, TransactionBehavior};
use tracing::instrument;

use crate::database::{db_err, Database};

/// Timeline and watermark storage over SQLite.
///
/// `append_message` runs an IMMEDIATE transaction: the write lock is taken
/// up front, so the duplicate check, the `MAX(seq)+1` read, and the insert
/// form one unit of work per conversation. The unique indexes on `msg_id`
/// and `(conversation_id, seq)` back the same invariants at the schema
/// level.
#[derive(Clone)]
pub struct SqliteTimeline {
    db: Database,
}

impl SqliteTimeline {
    /// Create a timeline store over an open database.
    #[must_use]
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Stored watermark for a `(user, conversation)` pair, if any.
    ///
    /// Not part of the collaborator trait; used by operational tooling and
    /// tests.
    pub fn get_ack(&self, user_id: &str, conversation_id: &str) -> Result<Option<i64>, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT last_ack_seq FROM user_conversation_state
                 WHERE user_id = ?1 AND conversation_id = ?2",
                params![user_id, conversation_id],
                |row| row.get(0),
            )
            .optional()
            .map_err(db_err)
        })
    }

    /// Number of stored rows carrying a message identifier.
    pub fn count_msg_id(&self, msg_id: &str) -> Result<i64, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM timeline_message WHERE msg_id = ?1",
                [msg_id],
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }
}

impl TimelineStore for SqliteTimeline {
    #[instrument(skip(self, draft), fields(msg_id = %draft.msg_id, conversation = %draft.conversation_id))]
    fn append_message(&self, draft: &NewMessage) -> Result<TimelineMessage, StoreError> {
        self.db.with_conn_mut(|conn| {
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(db_err)?;

            let duplicate: Option<i64> = tx
                .query_row(
                    "SELECT 1 FROM timeline_message WHERE msg_id = ?1",
                    [&draft.msg_id],
                    |row| row.get(0),
                )
                .optional()
                .map_err(db_err)?;
            if duplicate.is_some() {
                return Err(StoreError::DuplicateMsgId(draft.msg_id.clone()));
            }

            let seq: u64 = tx
                .query_row(
                    "SELECT COALESCE(MAX(seq), 0) + 1 FROM timeline_message
                     WHERE conversation_id = ?1",
                    [&draft.conversation_id],
                    |row| row.get(0),
                )
                .map_err(db_err)?;

            let created_at = Utc::now().to_rfc3339();
            tx.execute(
                "INSERT INTO timeline_message
                     (msg_id, conversation_id, seq, sender_id, content, msg_type, status, send_time, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    draft.msg_id,
                    draft.conversation_id,
                    seq,
                    draft.sender_id,
                    draft.content,
                    draft.msg_type,
                    0,
                    draft.send_time,
                    created_at,
                ],
            )
            .map_err(db_err)?;

            tx.commit().map_err(db_err)?;

            Ok(TimelineMessage {
                msg_id: draft.msg_id.clone(),
                conversation_id: draft.conversation_id.clone(),
                seq,
                sender_id: draft.sender_id.clone(),
                content: draft.content.clone(),
                msg_type: draft.msg_type,
                status: 0,
                send_time: draft.send_time,
                created_at,
            })
        })
    }

    #[instrument(skip(self))]
    fn find_by_msg_id(&self, msg_id: &str) -> Result<TimelineMessage, StoreError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT msg_id, conversation_id, seq, sender_id, content, msg_type, status, send_time, created_at
                 FROM timeline_message WHERE msg_id = ?1",
                [msg_id],
                row_to_message,
            )
            .optional()
            .map_err(db_err)?
            .ok_or_else(|| StoreError::NotFound(format!("message {msg_id}")))
        })
    }

    #[instrument(skip(self), fields(conversation = %conversation_id, after_seq, limit))]
    fn list_after_seq(
        &self,
        conversation_id: &str,
        after_seq: u64,
        limit: usize,
    ) -> Result<Vec<TimelineMessage>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT msg_id, conversation_id, seq, sender_id, content, msg_type, status, send_time, created_at
                     FROM timeline_message
                     WHERE conversation_id = ?1 AND seq > ?2
                     ORDER BY seq ASC
                     LIMIT ?3",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map(
                    params![conversation_id, after_seq, limit as i64],
                    row_to_message,
                )
                .map_err(db_err)?;
            rows.collect::<Result<Vec<_>, _>>().map_err(db_err)
        })
    }

    #[instrument(skip(self), fields(user = %user_id, conversation = %conversation_id, ack_seq))]
    fn upsert_ack_max(
        &self,
        user_id: &str,
        conversation_id: &str,
        ack_seq: i64,
    ) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user_conversation_state (user_id, conversation_id, last_ack_seq, updated_at)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (user_id, conversation_id) DO UPDATE SET
                     last_ack_seq = MAX(last_ack_seq, excluded.last_ack_seq),
                     updated_at = excluded.updated_at",
                params![user_id, conversation_id, ack_seq, Utc::now().to_rfc3339()],
            )
            .map_err(db_err)?;
            Ok(())
        })
    }
}

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<TimelineMessage> {
    Ok(TimelineMessage {
        msg_id: row.get(0)?,
        conversation_id: row.get(1)?,
        seq: row.get(2)?,
        sender_id: row.get(3)?,
        content: row.get(4)?,
        msg_type: row.get(5)?,
        status: row.get(6)?,
        send_time: row.get(7)?,
        created_at: row.get(8)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::DEFAULT_MSG_TYPE;

    fn store() -> SqliteTimeline {
        SqliteTimeline::new(Database::in_memory().unwrap())
    }

    fn draft(msg_id: &str, conversation_id: &str, content: &str) -> NewMessage {
        NewMessage {
            msg_id: msg_id.to_string(),
            conversation_id: conversation_id.to_string(),
            sender_id: "u1".to_string(),
            content: content.to_string(),
            msg_type: DEFAULT_MSG_TYPE,
            send_time: 1_700_000_000_000,
        }
    }

    #[test]
    fn append_assigns_dense_seq_per_conversation() {
        let store = store();

        for (i, msg_id) in ["m1", "m2", "m3"].iter().enumerate() {
            let saved = store.append_message(&draft(msg_id, "c1", "hello")).unwrap();
            assert_eq!(saved.seq, i as u64 + 1);
        }
    }

    #[test]
    fn append_isolates_conversations() {
        let store = store();

        assert_eq!(store.append_message(&draft("a1", "convA", "A1")).unwrap().seq, 1);
        assert_eq!(store.append_message(&draft("b1", "convB", "B1")).unwrap().seq, 1);
        assert_eq!(store.append_message(&draft("a2", "convA", "A2")).unwrap().seq, 2);
    }

    #[test]
    fn append_rejects_duplicate_msg_id() {
        let store = store();

        store.append_message(&draft("dup", "c1", "once")).unwrap();
        let err = store
            .append_message(&draft("dup", "c1", "twice"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMsgId(ref id) if id == "dup"));

        // The original row is untouched and remains the only one.
        assert_eq!(store.count_msg_id("dup").unwrap(), 1);
        assert_eq!(store.find_by_msg_id("dup").unwrap().content, "once");
    }

    #[test]
    fn append_rejects_duplicate_across_conversations() {
        let store = store();

        store.append_message(&draft("shared", "c1", "first")).unwrap();
        let err = store
            .append_message(&draft("shared", "c2", "second"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateMsgId(_)));
        assert_eq!(store.count_msg_id("shared").unwrap(), 1);
    }

    #[test]
    fn find_by_msg_id_distinguishes_not_found() {
        let store = store();
        let err = store.find_by_msg_id("ghost").unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));

        store.append_message(&draft("real", "c1", "hi")).unwrap();
        let found = store.find_by_msg_id("real").unwrap();
        assert_eq!(found.conversation_id, "c1");
        assert_eq!(found.seq, 1);
    }

    #[test]
    fn list_after_seq_ascending_with_limit() {
        let store = store();
        for i in 1..=5 {
            store
                .append_message(&draft(&format!("m{i}"), "c1", "x"))
                .unwrap();
        }

        let rows = store.list_after_seq("c1", 2, 2).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].seq, 3);
        assert_eq!(rows[1].seq, 4);

        let tail = store.list_after_seq("c1", 5, 10).unwrap();
        assert!(tail.is_empty());
    }

    #[test]
    fn ack_upsert_is_monotonic() {
        let store = store();

        store.upsert_ack_max("u1", "c1", 10).unwrap();
        assert_eq!(store.get_ack("u1", "c1").unwrap(), Some(10));

        // A regressing ack is a no-op.
        store.upsert_ack_max("u1", "c1", 5).unwrap();
        assert_eq!(store.get_ack("u1", "c1").unwrap(), Some(10));

        store.upsert_ack_max("u1", "c1", 15).unwrap();
        assert_eq!(store.get_ack("u1", "c1").unwrap(), Some(15));
    }

    #[test]
    fn ack_rows_are_per_user_and_conversation() {
        let store = store();

        store.upsert_ack_max("u1", "c1", 3).unwrap();
        store.upsert_ack_max("u2", "c1", 7).unwrap();
        store.upsert_ack_max("u1", "c2", 9).unwrap();

        assert_eq!(store.get_ack("u1", "c1").unwrap(), Some(3));
        assert_eq!(store.get_ack("u2", "c1").unwrap(), Some(7));
        assert_eq!(store.get_ack("u1", "c2").unwrap(), Some(9));
        assert_eq!(store.get_ack("u2", "c2").unwrap(), None);
    }

    #[test]
    fn concurrent_appends_stay_gap_free() {
        use std::sync::Arc;

        let store = Arc::new(store());
        let mut handles = Vec::new();
        for t in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store
                    .append_message(&draft(&format!("t{t}"), "busy", "x"))
                    .unwrap()
                    .seq
            }));
        }

        let mut seqs: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        seqs.sort_unstable();
        assert_eq!(seqs, (1..=8).collect::<Vec<u64>>());
    }

    #[test]
    fn concurrent_duplicates_keep_one_row() {
        use std::sync::Arc;

        let store = Arc::new(store());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                store.append_message(&draft("same", "c1", "x")).is_ok()
            }));
        }

        let outcomes: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
        assert_eq!(store.count_msg_id("same").unwrap(), 1);
    }
}
