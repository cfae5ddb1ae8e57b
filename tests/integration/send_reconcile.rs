// Test-specific lint overrides: integration tests use unwrap/expect freely.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_panics_doc,
    clippy::missing_docs_in_private_items
)]

//! Integration tests for the optimistic send pipeline.
//!
//! Verifies:
//! 1. A send inserts immediately with a temporary id and status `Sent`.
//! 2. Persistence success reconciles to the server id (`m100`) with
//!    content and timestamp preserved, and exactly one entry remains.
//! 3. Persistence failure marks the message `Failed` without changing
//!    the conversation's message count.
//! 4. Delete and react roll back when persistence rejects them.
//! 5. Peer dispatchers observe sends, deletes, and reactions.
//! 6. History merges are idempotent against live state.

use std::time::Duration;

use wirechat::codec::PlainCodec;
use wirechat::config::CoreConfig;
use wirechat::connection::ConnectionManager;
use wirechat::dispatcher::{CoreEvent, DispatchError, Dispatcher};
use wirechat::persistence::InMemoryPersistence;
use wirechat::transport::loopback::{LoopbackDialer, LoopbackHub};

use wirechat_proto::delivery::DeliveryStatus;
use wirechat_proto::ids::{ConversationId, MessageId, Timestamp, UserId};
use wirechat_proto::message::{Message, MessageDraft, MessageKind};

use std::sync::Arc;
use tokio::sync::mpsc;

type TestDispatcher = Dispatcher<Arc<InMemoryPersistence>, PlainCodec>;

/// Connects a dispatcher for `user` through the given hub.
async fn connect_user(
    hub: &LoopbackHub,
    user: &str,
) -> (TestDispatcher, Arc<InMemoryPersistence>) {
    let config = CoreConfig::default();
    let manager: ConnectionManager<LoopbackDialer> =
        ConnectionManager::new(hub.dialer(), &config);
    let handle = manager.connect(&UserId::new(user)).await.unwrap();
    let persistence = Arc::new(InMemoryPersistence::new());
    let dispatcher = Dispatcher::new(handle, Arc::clone(&persistence), PlainCodec, &config);
    (dispatcher, persistence)
}

/// Polls until `predicate` holds or the deadline passes.
async fn wait_until(mut predicate: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if predicate() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(predicate(), "condition not reached before deadline");
}

/// Drains currently queued events from a subscriber channel.
fn drain(rx: &mut mpsc::Receiver<CoreEvent>) -> Vec<CoreEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn history_message(id: &str, conversation_id: ConversationId, sent_at: u64) -> Message {
    Message {
        id: MessageId::server(id),
        conversation_id,
        sender_id: UserId::new("u2"),
        content: "from history".to_string(),
        kind: MessageKind::Text,
        sent_at: Timestamp::from_millis(sent_at),
        status: DeliveryStatus::Delivered,
        reply_to: None,
        reactions: Vec::new(),
        self_destruct_at: None,
        code_language: None,
        code_filename: None,
    }
}

#[tokio::test(start_paused = true)]
async fn send_inserts_immediately_with_temp_id() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;
    // Confirmation cannot land before we look at the optimistic state.
    persistence.set_latency(Duration::from_millis(50));

    let conversation = ConversationId::direct("u2");
    let message = alice
        .send_message(conversation.clone(), MessageDraft::text("hi"))
        .unwrap();

    assert!(message.id.is_local());
    assert_eq!(message.status, DeliveryStatus::Sent);

    let stored = alice.conversation(&conversation);
    assert_eq!(stored.len(), 1);
    assert!(stored[0].id.is_local());
    assert_eq!(stored[0].status, DeliveryStatus::Sent);
    assert_eq!(stored[0].content, "hi");
}

#[tokio::test]
async fn send_reconciles_to_server_id() {
    let hub = LoopbackHub::new();
    let (alice, _persistence) = connect_user(&hub, "u1").await;

    let conversation = ConversationId::direct("u2");
    let sent = alice
        .send_message(conversation.clone(), MessageDraft::text("hi"))
        .unwrap();

    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || {
        store
            .message(&conv, &MessageId::server("m100"))
            .is_some()
    })
    .await;

    let stored = alice.conversation(&conversation);
    assert_eq!(stored.len(), 1, "reconcile must never duplicate");
    assert_eq!(stored[0].id, MessageId::server("m100"));
    assert_eq!(stored[0].status, DeliveryStatus::Sent);
    assert_eq!(stored[0].content, "hi");
    assert_eq!(stored[0].sent_at, sent.sent_at);
}

#[tokio::test]
async fn failed_send_marks_failed_without_duplicate() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;
    persistence.set_fail_sends(true);

    let mut events = alice.subscribe();
    let conversation = ConversationId::direct("u2");
    let sent = alice
        .send_message(conversation.clone(), MessageDraft::text("doomed"))
        .unwrap();

    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    let id = sent.id.clone();
    wait_until(move || {
        store
            .message(&conv, &id)
            .is_some_and(|m| m.status == DeliveryStatus::Failed)
    })
    .await;

    let stored = alice.conversation(&conversation);
    assert_eq!(stored.len(), 1, "no duplicate, no removal");
    assert_eq!(stored[0].status, DeliveryStatus::Failed);

    let seen = drain(&mut events);
    assert!(seen.iter().any(|e| matches!(
        e,
        CoreEvent::DeliveryChanged {
            status: DeliveryStatus::Failed,
            ..
        }
    )));
}

#[tokio::test]
async fn resend_after_failure_is_a_fresh_send() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;
    persistence.set_fail_sends(true);

    let conversation = ConversationId::direct("u2");
    let failed = alice
        .send_message(conversation.clone(), MessageDraft::text("try 1"))
        .unwrap();

    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    let failed_id = failed.id.clone();
    wait_until(move || {
        store
            .message(&conv, &failed_id)
            .is_some_and(|m| m.status == DeliveryStatus::Failed)
    })
    .await;

    // The user resubmits; there is no automatic retry queue.
    persistence.set_fail_sends(false);
    alice
        .send_message(conversation.clone(), MessageDraft::text("try 2"))
        .unwrap();

    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;

    let stored = alice.conversation(&conversation);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].status, DeliveryStatus::Failed);
    assert_eq!(stored[1].id, MessageId::server("m100"));
}

#[tokio::test]
async fn empty_draft_fails_validation() {
    let hub = LoopbackHub::new();
    let (alice, _persistence) = connect_user(&hub, "u1").await;

    let result = alice.send_message(ConversationId::direct("u2"), MessageDraft::text(""));
    assert!(matches!(result, Err(DispatchError::Validation(_))));
    assert!(alice.conversation(&ConversationId::direct("u2")).is_empty());
}

#[tokio::test]
async fn peer_dispatcher_receives_sent_message() {
    let hub = LoopbackHub::new();
    let (alice, _ap) = connect_user(&hub, "u1").await;
    let (bob, _bp) = connect_user(&hub, "u2").await;

    let mut bob_events = bob.subscribe();
    alice
        .send_message(ConversationId::direct("u2"), MessageDraft::text("hello bob"))
        .unwrap();

    // Bob files the direct chat under his own peer: u1.
    let bob_conversation = ConversationId::direct("u1");
    let store = Arc::clone(bob.store());
    let conv = bob_conversation.clone();
    wait_until(move || store.len(&conv) == 1).await;

    let stored = bob.conversation(&bob_conversation);
    assert_eq!(stored[0].id, MessageId::server("m100"));
    assert_eq!(stored[0].content, "hello bob");
    assert_eq!(stored[0].sender_id, UserId::new("u1"));

    let seen = drain(&mut bob_events);
    assert!(seen.iter().any(|e| matches!(
        e,
        CoreEvent::MessageAppended { conversation_id, .. }
            if *conversation_id == bob_conversation
    )));
}

#[tokio::test]
async fn delete_rolls_back_on_persistence_failure() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;

    let conversation = ConversationId::direct("u2");
    alice
        .send_message(conversation.clone(), MessageDraft::text("keep me"))
        .unwrap();
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;

    persistence.set_fail_deletes(true);
    alice
        .delete_message(&conversation, &MessageId::server("m100"))
        .unwrap();

    // Optimistically gone, then restored by the compensating rollback.
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;
    assert_eq!(alice.conversation(&conversation).len(), 1);
}

#[tokio::test]
async fn delete_succeeds_and_notifies_peer() {
    let hub = LoopbackHub::new();
    let (alice, _ap) = connect_user(&hub, "u1").await;
    let (bob, _bp) = connect_user(&hub, "u2").await;

    let alice_conversation = ConversationId::direct("u2");
    let bob_conversation = ConversationId::direct("u1");

    alice
        .send_message(alice_conversation.clone(), MessageDraft::text("oops"))
        .unwrap();
    let store = Arc::clone(bob.store());
    let conv = bob_conversation.clone();
    wait_until(move || store.len(&conv) == 1).await;

    alice
        .delete_message(&alice_conversation, &MessageId::server("m100"))
        .unwrap();

    let store = Arc::clone(bob.store());
    let conv = bob_conversation.clone();
    wait_until(move || store.is_empty(&conv)).await;
    assert!(alice.conversation(&alice_conversation).is_empty());
}

#[tokio::test]
async fn reaction_rolls_back_on_persistence_failure() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;

    let conversation = ConversationId::direct("u2");
    alice
        .send_message(conversation.clone(), MessageDraft::text("react to me"))
        .unwrap();
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;

    persistence.set_fail_reactions(true);
    alice
        .react_to_message(&conversation, &MessageId::server("m100"), "🔥")
        .unwrap();

    // Optimistically added, then reverted.
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || {
        store
            .message(&conv, &MessageId::server("m100"))
            .is_some_and(|m| m.reactions.is_empty())
    })
    .await;
}

#[tokio::test]
async fn reaction_reaches_peer() {
    let hub = LoopbackHub::new();
    let (alice, _ap) = connect_user(&hub, "u1").await;
    let (bob, _bp) = connect_user(&hub, "u2").await;

    let alice_conversation = ConversationId::direct("u2");
    let bob_conversation = ConversationId::direct("u1");

    alice
        .send_message(alice_conversation.clone(), MessageDraft::text("nice"))
        .unwrap();
    let store = Arc::clone(bob.store());
    let conv = bob_conversation.clone();
    wait_until(move || store.len(&conv) == 1).await;

    bob.react_to_message(&bob_conversation, &MessageId::server("m100"), "👍")
        .unwrap();

    let store = Arc::clone(alice.store());
    let conv = alice_conversation.clone();
    wait_until(move || {
        store
            .message(&conv, &MessageId::server("m100"))
            .is_some_and(|m| m.reactions.len() == 1)
    })
    .await;

    let stored = alice.conversation(&alice_conversation);
    assert_eq!(stored[0].reactions[0].emoji, "👍");
    assert_eq!(stored[0].reactions[0].user, UserId::new("u2"));
}

#[tokio::test]
async fn delete_unknown_message_is_not_found() {
    let hub = LoopbackHub::new();
    let (alice, _persistence) = connect_user(&hub, "u1").await;

    let result = alice.delete_message(&ConversationId::direct("u2"), &MessageId::server("m404"));
    assert!(matches!(result, Err(DispatchError::NotFound(_))));
}

#[tokio::test]
async fn status_update_from_peer_advances_delivery() {
    let hub = LoopbackHub::new();
    let (alice, _ap) = connect_user(&hub, "u1").await;
    let (bob, _bp) = connect_user(&hub, "u2").await;

    let alice_conversation = ConversationId::direct("u2");
    let bob_conversation = ConversationId::direct("u1");

    alice
        .send_message(alice_conversation.clone(), MessageDraft::text("read me"))
        .unwrap();
    let store = Arc::clone(bob.store());
    let conv = bob_conversation.clone();
    wait_until(move || store.len(&conv) == 1).await;

    // Bob confirms delivery, then read, over the wire.
    use wirechat_proto::event::WireEvent;
    for status in [DeliveryStatus::Delivered, DeliveryStatus::Read] {
        bob.connection()
            .publish(
                vec![UserId::new("u1")],
                WireEvent::StatusUpdated {
                    conversation_id: bob_conversation.clone(),
                    message_id: MessageId::server("m100"),
                    status,
                },
            )
            .await
            .unwrap();
    }

    let store = Arc::clone(alice.store());
    let conv = alice_conversation.clone();
    wait_until(move || {
        store
            .message(&conv, &MessageId::server("m100"))
            .is_some_and(|m| m.status == DeliveryStatus::Read)
    })
    .await;
}

#[tokio::test(start_paused = true)]
async fn self_destruct_removes_locally() {
    let hub = LoopbackHub::new();
    let (alice, _persistence) = connect_user(&hub, "u1").await;

    let conversation = ConversationId::direct("u2");
    let draft = MessageDraft {
        self_destruct_secs: Some(1),
        ..MessageDraft::text("gone soon")
    };
    alice.send_message(conversation.clone(), draft).unwrap();
    assert_eq!(alice.conversation(&conversation).len(), 1);

    tokio::time::sleep(Duration::from_millis(1200)).await;

    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.is_empty(&conv)).await;
}

#[tokio::test]
async fn history_merge_is_idempotent() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;
    let conversation = ConversationId::direct("u2");

    persistence.seed_history(vec![
        history_message("h1", conversation.clone(), 100),
        history_message("h2", conversation.clone(), 200),
    ]);

    let inserted = alice.load_history(&conversation).await.unwrap();
    assert_eq!(inserted, 2);

    // A second load changes nothing.
    let inserted = alice.load_history(&conversation).await.unwrap();
    assert_eq!(inserted, 0);
    assert_eq!(alice.conversation(&conversation).len(), 2);
}

#[tokio::test]
async fn history_interleaves_with_live_messages_by_sent_at() {
    let hub = LoopbackHub::new();
    let (alice, persistence) = connect_user(&hub, "u1").await;
    let conversation = ConversationId::direct("u2");

    alice
        .send_message(conversation.clone(), MessageDraft::text("live"))
        .unwrap();
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;

    // History predates the live message.
    persistence.seed_history(vec![history_message("h1", conversation.clone(), 100)]);
    alice.load_history(&conversation).await.unwrap();

    let stored = alice.conversation(&conversation);
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].id, MessageId::server("h1"));
    assert_eq!(stored[1].id, MessageId::server("m100"));
}

#[tokio::test]
async fn mark_seen_tracks_cursor() {
    let hub = LoopbackHub::new();
    let (alice, _persistence) = connect_user(&hub, "u1").await;
    let conversation = ConversationId::direct("u2");

    alice
        .send_message(conversation.clone(), MessageDraft::text("one"))
        .unwrap();
    let store = Arc::clone(alice.store());
    let conv = conversation.clone();
    wait_until(move || store.message(&conv, &MessageId::server("m100")).is_some()).await;

    alice.mark_seen(&conversation, &MessageId::server("m100"));
    assert_eq!(
        alice.store().last_seen(&conversation),
        Some(MessageId::server("m100"))
    );
}
