//! Sequencer and PullService over the real SQLite store.

use std::sync::Arc;

use relay_core::{NewMessage, PullService, Sequencer, StoreError, DEFAULT_MSG_TYPE};
use relay_store::{Database, SqliteTimeline};

fn setup() -> (Sequencer, PullService, Arc<SqliteTimeline>) {
    let store = Arc::new(SqliteTimeline::new(Database::in_memory().unwrap()));
    (
        Sequencer::new(store.clone()),
        PullService::new(store.clone()),
        store,
    )
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
fn sequential_saves_yield_dense_seq() {
    let (sequencer, _, _) = setup();

    for (i, id) in ["m1", "m2", "m3", "m4"].iter().enumerate() {
        let saved = sequencer.save_message(draft(id, "conv-seq", "hello")).unwrap();
        assert_eq!(saved.seq, i as u64 + 1);
    }
}

#[test]
fn conversations_count_independently() {
    let (sequencer, pull, _) = setup();

    // m1, m2 into c1; a1 into convA and b1 into convB get independent seq 1.
    assert_eq!(sequencer.save_message(draft("m1", "c1", "one")).unwrap().seq, 1);
    assert_eq!(sequencer.save_message(draft("m2", "c1", "two")).unwrap().seq, 2);
    assert_eq!(sequencer.save_message(draft("a1", "convA", "A1")).unwrap().seq, 1);
    assert_eq!(sequencer.save_message(draft("b1", "convB", "B1")).unwrap().seq, 1);

    let res = pull.pull_messages("convA", 0, 50).unwrap();
    assert_eq!(res.messages.len(), 1);
    assert_eq!(res.messages[0].msg_id, "a1");
    assert!(!res.has_more);
    assert_eq!(res.next_cursor_seq, 1);
}

#[test]
fn duplicate_submission_is_already_recorded() {
    let (sequencer, _, store) = setup();

    let first = sequencer.save_message(draft("retry-1", "c1", "payload")).unwrap();

    // Same identifier, same conversation.
    let err = sequencer
        .save_message(draft("retry-1", "c1", "changed"))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateMsgId(_)));

    // Same identifier, different conversation.
    let err = sequencer
        .save_message(draft("retry-1", "c2", "elsewhere"))
        .unwrap_err();
    assert!(matches!(err, StoreError::DuplicateMsgId(_)));

    // Exactly one row survives, untouched.
    assert_eq!(store.count_msg_id("retry-1").unwrap(), 1);
    let stored = sequencer.find_by_message_id("retry-1").unwrap();
    assert_eq!(stored.content, "payload");
    assert_eq!(stored.seq, first.seq);
}

#[test]
fn find_by_message_id_not_found_is_distinct() {
    let (sequencer, _, _) = setup();
    let err = sequencer.find_by_message_id("never-sent").unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
}

#[test]
fn pull_pagination_contract() {
    let (sequencer, pull, _) = setup();
    for i in 1..=5 {
        sequencer
            .save_message(draft(&format!("p{i}"), "conv-page", "x"))
            .unwrap();
    }

    // More than limit remain: exactly limit rows, has_more, cursor at the
    // limit-th seq.
    let page = pull.pull_messages("conv-page", 0, 2).unwrap();
    assert_eq!(page.messages.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.next_cursor_seq, 2);

    // Resume from the returned cursor.
    let page = pull.pull_messages("conv-page", page.next_cursor_seq, 2).unwrap();
    assert_eq!(page.messages.len(), 2);
    assert!(page.has_more);
    assert_eq!(page.next_cursor_seq, 4);

    // Fewer than limit remain.
    let page = pull.pull_messages("conv-page", page.next_cursor_seq, 2).unwrap();
    assert_eq!(page.messages.len(), 1);
    assert!(!page.has_more);
    assert_eq!(page.next_cursor_seq, 5);

    // Empty tail echoes the cursor back.
    let page = pull.pull_messages("conv-page", 5, 2).unwrap();
    assert!(page.messages.is_empty());
    assert!(!page.has_more);
    assert_eq!(page.next_cursor_seq, 5);
}

#[test]
fn pull_empty_conversation_echoes_cursor() {
    let (_, pull, _) = setup();
    let res = pull.pull_messages("nobody-home", 0, 50).unwrap();
    assert!(res.messages.is_empty());
    assert!(!res.has_more);
    assert_eq!(res.next_cursor_seq, 0);
}

#[test]
fn ack_watermark_never_regresses() {
    let (_, pull, store) = setup();

    pull.ack_conversation("u1", "conv-ack", 10).unwrap();
    assert_eq!(store.get_ack("u1", "conv-ack").unwrap(), Some(10));

    pull.ack_conversation("u1", "conv-ack", 5).unwrap();
    assert_eq!(store.get_ack("u1", "conv-ack").unwrap(), Some(10));

    pull.ack_conversation("u1", "conv-ack", 15).unwrap();
    assert_eq!(store.get_ack("u1", "conv-ack").unwrap(), Some(15));
}

#[test]
fn interleaved_saves_keep_conversations_gap_free() {
    let (sequencer, pull, _) = setup();

    let sequencer = Arc::new(sequencer);
    let mut handles = Vec::new();
    for t in 0..4 {
        let sequencer = sequencer.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..5 {
                sequencer
                    .save_message(draft(&format!("t{t}-i{i}"), &format!("conv-{t}"), "x"))
                    .unwrap();
            }
        }));
    }
    for handle in handles {
        handle.join().unwrap();
    }

    for t in 0..4 {
        let page = pull.pull_messages(&format!("conv-{t}"), 0, 50).unwrap();
        let seqs: Vec<u64> = page.messages.iter().map(|m| m.seq).collect();
        assert_eq!(seqs, (1..=5).collect::<Vec<u64>>());
    }
}
