//! End-to-end messaging scenarios
//!
//! Real clients against the in-process broker and an in-memory
//! persistence fake. The clock is paused, so debounce windows and
//! reconnect backoff run on virtual time.
//!
//! Run with: cargo test -p integration-tests --test scenario_tests

use dm_client::{RealtimeError, StoreEvent};
use dm_core::{ClientEvent, ConversationId, DeliveryState, MessageKind, UserId};
use integration_tests::{test_config, wait_until, within, InMemoryApi, TestStack};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const DEADLINE: Duration = Duration::from_secs(5);

// ============================================================================
// Delivery
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_send_is_optimistic_then_acked() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();
    bob.client.open_conversation(conversation_id).await.unwrap();

    let mut changes = alice.client.subscribe_messages();
    let sent = alice
        .client
        .send_message(conversation_id, MessageKind::Text, "hi".to_string(), None)
        .await
        .unwrap();

    // Optimistic copy first, in `sending`
    let placeholder_id = match within(DEADLINE, changes.recv()).await.unwrap() {
        StoreEvent::Added(msg) => {
            assert_eq!(msg.delivery, DeliveryState::Sending);
            msg.id
        }
        other => panic!("unexpected event: {other:?}"),
    };

    // Then the ack re-keys it to a different, server-assigned id
    match within(DEADLINE, changes.recv()).await.unwrap() {
        StoreEvent::Rekeyed {
            placeholder_id: old,
            message,
        } => {
            assert_eq!(old, placeholder_id);
            assert_ne!(message.id, placeholder_id);
            assert_eq!(message.id, sent.id);
            assert_eq!(message.delivery, DeliveryState::Sent);
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // The peer receives it through the room
    assert!(
        wait_until(DEADLINE, || {
            bob.client
                .messages(conversation_id)
                .iter()
                .any(|m| m.id == sent.id)
        })
        .await
    );
    // And the backend holds the durable copy
    assert!(stack.backend.message(conversation_id, sent.id).is_some());
}

#[tokio::test(start_paused = true)]
async fn test_failed_send_then_explicit_retry() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();

    stack.backend.set_fail_create(true);
    let result = alice
        .client
        .send_message(conversation_id, MessageKind::Text, "hi".to_string(), None)
        .await;
    assert!(matches!(result, Err(RealtimeError::Network(_))));

    let stored = alice.client.messages(conversation_id);
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].delivery, DeliveryState::Failed);
    let failed_id = stored[0].id;

    // No automatic retry happens; the user taps retry explicitly
    stack.backend.set_fail_create(false);
    let sent = alice
        .client
        .retry_message(conversation_id, failed_id)
        .await
        .unwrap();

    assert_ne!(sent.id, failed_id);
    // The failed entry stays visibly distinct next to the new attempt
    let stored = alice.client.messages(conversation_id);
    assert_eq!(stored.len(), 2);
    assert!(stored
        .iter()
        .any(|m| m.id == failed_id && m.delivery == DeliveryState::Failed));
    assert!(stored
        .iter()
        .any(|m| m.id == sent.id && m.delivery == DeliveryState::Sent));
    assert_eq!(stack.backend.message_count(conversation_id), 1);
}

// ============================================================================
// Typing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_typing_spam_emits_one_start() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();
    bob.client.open_conversation(conversation_id).await.unwrap();

    let mut typing_changes = bob.client.subscribe_typing();

    // A keystroke every 500ms for 5s stays inside the 3s quiet window
    for _ in 0..10 {
        alice.client.notify_typing(conversation_id).await.unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;
    }

    // Exactly one start reaches the peer
    let change = within(DEADLINE, typing_changes.recv()).await.unwrap();
    assert!(change.is_typing);
    assert_eq!(change.user_id, alice.user_id);
    assert!(typing_changes.try_recv().is_err());

    // The quiet period after the last keystroke emits the stop
    tokio::time::sleep(Duration::from_millis(3100)).await;
    let change = within(DEADLINE, typing_changes.recv()).await.unwrap();
    assert!(!change.is_typing);
    assert!(bob.client.typing_users(conversation_id).is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_typing_indicator_self_heals_without_stop() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();

    // A raw peer connection that starts typing and then goes silent,
    // as if its typing_stop was lost on the network
    let bob_id = UserId::random();
    let (tx, _rx) = mpsc::channel(16);
    let bob_conn = stack.broker.register(bob_id, tx).await;
    stack
        .broker
        .handle_event(bob_conn, ClientEvent::JoinConversation { conversation_id })
        .await
        .unwrap();
    stack
        .broker
        .handle_event(
            bob_conn,
            ClientEvent::Typing {
                conversation_id,
                is_typing: true,
            },
        )
        .await
        .unwrap();

    assert!(
        wait_until(DEADLINE, || {
            alice.client.typing_users(conversation_id).contains(&bob_id)
        })
        .await
    );

    // No stop ever arrives; the local fallback clears within 3100ms
    tokio::time::sleep(Duration::from_millis(3100)).await;
    assert!(alice.client.typing_users(conversation_id).is_empty());
}

// ============================================================================
// Read receipts
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_visible_message_produces_read_receipt() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();
    bob.client.open_conversation(conversation_id).await.unwrap();

    let sent = bob
        .client
        .send_message(conversation_id, MessageKind::Text, "hi".to_string(), None)
        .await
        .unwrap();

    // Alice has the conversation open, so one reconciliation pass marks
    // the message seen against the backend
    assert!(
        wait_until(DEADLINE, || {
            stack
                .backend
                .message(conversation_id, sent.id)
                .is_some_and(|m| m.seen_by.contains(&alice.user_id))
        })
        .await
    );

    // And Bob's copy gains Alice through the seen broadcast
    assert!(
        wait_until(DEADLINE, || {
            bob.client
                .messages(conversation_id)
                .iter()
                .any(|m| m.id == sent.id && m.seen_by.contains(&alice.user_id))
        })
        .await
    );
    // The sender is never counted as a viewer of their own message
    let stored = stack.backend.message(conversation_id, sent.id).unwrap();
    assert!(!stored.seen_by.contains(&bob.user_id));
}

#[tokio::test(start_paused = true)]
async fn test_failed_seen_flush_recovers_on_next_pass() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.join_room(conversation_id).await.unwrap();
    bob.client.open_conversation(conversation_id).await.unwrap();

    stack.backend.set_fail_seen(true);
    let sent = bob
        .client
        .send_message(conversation_id, MessageKind::Text, "hi".to_string(), None)
        .await
        .unwrap();
    assert!(
        wait_until(DEADLINE, || {
            !alice.client.messages(conversation_id).is_empty()
        })
        .await
    );

    // The flush fails silently while the view is visible
    alice.client.open_conversation(conversation_id).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!stack
        .backend
        .message(conversation_id, sent.id)
        .unwrap()
        .seen_by
        .contains(&alice.user_id));

    // Re-opening the view re-derives the unseen state and succeeds
    stack.backend.set_fail_seen(false);
    alice.client.close_conversation(conversation_id).await.unwrap();
    alice.client.open_conversation(conversation_id).await.unwrap();
    assert!(
        wait_until(DEADLINE, || {
            stack
                .backend
                .message(conversation_id, sent.id)
                .is_some_and(|m| m.seen_by.contains(&alice.user_id))
        })
        .await
    );
}

// ============================================================================
// History sync
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_history_sync_merges_and_reconciles() {
    let stack = TestStack::new();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    bob.client.open_conversation(conversation_id).await.unwrap();
    let first = bob
        .client
        .send_message(conversation_id, MessageKind::Text, "one".to_string(), None)
        .await
        .unwrap();
    let second = bob
        .client
        .send_message(conversation_id, MessageKind::Text, "two".to_string(), None)
        .await
        .unwrap();

    // Alice logs in after the fact; nothing reached her over the wire
    let alice = stack.login("alice").await.unwrap();
    assert!(alice.client.messages(conversation_id).is_empty());

    alice.client.open_conversation(conversation_id).await.unwrap();
    let history = alice.client.sync_messages(conversation_id).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].id, first.id);
    assert_eq!(history[1].id, second.id);

    // The freshly synced backlog of a visible conversation gets marked seen
    assert!(
        wait_until(DEADLINE, || {
            stack
                .backend
                .message(conversation_id, second.id)
                .is_some_and(|m| m.seen_by.contains(&alice.user_id))
        })
        .await
    );
}

// ============================================================================
// Rooms
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_two_views_share_one_room_subscription() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    bob.client.open_conversation(conversation_id).await.unwrap();

    // Two views of the same conversation on Alice's side
    alice.client.join_room(conversation_id).await.unwrap();
    alice.client.join_room(conversation_id).await.unwrap();
    assert!(
        wait_until(DEADLINE, || stack.broker.room_size(conversation_id) == 2).await
    );

    // The first view unmounting must not cut events off for the second
    alice.client.leave_room(conversation_id).await.unwrap();
    bob.client.notify_typing(conversation_id).await.unwrap();
    assert!(
        wait_until(DEADLINE, || {
            alice
                .client
                .typing_users(conversation_id)
                .contains(&bob.user_id)
        })
        .await
    );

    // The last view departing leaves the room on the wire
    alice.client.leave_room(conversation_id).await.unwrap();
    assert!(
        wait_until(DEADLINE, || stack.broker.room_size(conversation_id) == 1).await
    );
}

// ============================================================================
// Presence and reconnect
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_presence_follows_connections() {
    let stack = TestStack::new();
    let bob = stack.login("bob").await.unwrap();
    let alice = stack.login("alice").await.unwrap();

    assert!(
        wait_until(DEADLINE, || bob.client.presence(alice.user_id).is_online).await
    );

    alice.client.shutdown();
    assert!(
        wait_until(DEADLINE, || {
            let record = bob.client.presence(alice.user_id);
            !record.is_online && record.last_seen_at > chrono::DateTime::UNIX_EPOCH
        })
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_unknown_peer_reported_offline() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();

    let stranger = UserId::random();
    let record = alice.client.presence(stranger);
    assert!(!record.is_online);
    assert_eq!(record.last_seen_at, chrono::DateTime::UNIX_EPOCH);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_rejoins_rooms() {
    let stack = TestStack::new();
    let alice = stack.login("alice").await.unwrap();
    let bob = stack.login("bob").await.unwrap();
    let conversation_id = ConversationId::random();
    alice.client.open_conversation(conversation_id).await.unwrap();
    bob.client.open_conversation(conversation_id).await.unwrap();

    // Drop Alice's connection out from under her
    stack.broker.kill_user(alice.user_id).await;
    assert!(
        wait_until(DEADLINE, || {
            alice.client.is_connected() && stack.broker.connection_count(alice.user_id) == 1
        })
        .await
    );

    // Her room membership was re-announced, so Bob's message arrives
    let sent = bob
        .client
        .send_message(conversation_id, MessageKind::Text, "still there?".to_string(), None)
        .await
        .unwrap();
    assert!(
        wait_until(DEADLINE, || {
            alice
                .client
                .messages(conversation_id)
                .iter()
                .any(|m| m.id == sent.id)
        })
        .await
    );
}

#[tokio::test(start_paused = true)]
async fn test_rejected_token_fails_login() {
    let stack = TestStack::new();
    let user_id = UserId::random();
    // Never authorized with the broker
    let connector = Arc::new(dm_broker::BrokerConnector::new(stack.broker.clone()));
    let api = Arc::new(InMemoryApi::new(stack.backend.clone(), user_id));

    let result = dm_client::RealtimeClient::connect(
        &test_config(),
        user_id,
        "forged-token",
        connector,
        api,
    )
    .await;
    assert!(matches!(result, Err(RealtimeError::Auth(_))));
}
