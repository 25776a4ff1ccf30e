//! `RoomActor` behavior tests.
//!
//! These live as integration tests rather than unit tests because they use
//! mocks from `chat-test-utils`, which depends on this crate; linking those
//! mocks from inside the library's own test target would pull in a second
//! copy of the crate whose trait impls do not match.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use chat_controller::actors::{
    ActorMetrics, ConnectionActor, ConnectionHandle, RoomActor, RoomHandle,
};
use chat_controller::errors::ChatError;
use chat_controller::mute::MuteRegistry;
use chat_controller::search::{SearchSynchronizer, SyncNotifier};
use chat_controller::store::MessageKind;
use chat_controller::transport::ServerFrame;
use chat_test_utils::{MockMessageStore, MockSearchIndex};
use common::types::{ConnectionId, MessageId, RoomId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;


fn test_sync(index: Arc<MockSearchIndex>, store: Arc<MockMessageStore>) -> SyncNotifier {
    let (_sync, notifier) = SearchSynchronizer::new(
        store,
        index,
        100,
        Duration::from_secs(3600),
        CancellationToken::new(),
    );
    notifier
}

fn spawn_room(store: Arc<MockMessageStore>) -> (RoomHandle, Arc<MuteRegistry>) {
    let mutes = Arc::new(MuteRegistry::new());
    let sync = test_sync(Arc::new(MockSearchIndex::new()), Arc::clone(&store));
    let (handle, _task) = RoomActor::spawn(
        RoomId::new(),
        CancellationToken::new(),
        store,
        Arc::clone(&mutes),
        sync,
        ActorMetrics::new(),
    );
    (handle, mutes)
}

fn spawn_subscriber(
    user_id: UserId,
) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
    let (outlet_tx, outlet_rx) = mpsc::channel(64);
    let (handle, _task) = ConnectionActor::spawn(
        ConnectionId::new(),
        user_id,
        64,
        outlet_tx,
        CancellationToken::new(),
        ActorMetrics::new(),
    );
    (handle, outlet_rx)
}

#[tokio::test]
async fn test_publish_persists_and_delivers() {
    let store = Arc::new(MockMessageStore::new());
    let (room, _mutes) = spawn_room(Arc::clone(&store));

    let alice = UserId::new();
    let bob = UserId::new();
    let (alice_conn, mut alice_rx) = spawn_subscriber(alice);
    let (bob_conn, mut bob_rx) = spawn_subscriber(bob);

    room.subscribe(alice_conn).await.expect("subscribe");
    room.subscribe(bob_conn).await.expect("subscribe");

    let id = room
        .publish(alice, MessageKind::Text, "hello room".to_string())
        .await
        .expect("publish should succeed");

    // Persisted before delivery
    assert_eq!(store.message_count().await, 1);

    // Both subscribers receive it, including the sender's own device
    for rx in [&mut alice_rx, &mut bob_rx] {
        match rx.recv().await.expect("frame should arrive") {
            ServerFrame::Message {
                message_id, body, ..
            } => {
                assert_eq!(message_id, id);
                assert_eq!(body, "hello room");
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_store_failure_blocks_delivery() {
    let store = Arc::new(MockMessageStore::new().with_append_failure());
    let (room, _mutes) = spawn_room(Arc::clone(&store));

    let bob = UserId::new();
    let (bob_conn, mut bob_rx) = spawn_subscriber(bob);
    room.subscribe(bob_conn).await.expect("subscribe");

    let result = room
        .publish(UserId::new(), MessageKind::Text, "doomed".to_string())
        .await;
    assert!(matches!(result, Err(ChatError::StoreUnavailable(_))));

    // Nobody got anything
    assert!(bob_rx.try_recv().is_err());
    assert_eq!(store.message_count().await, 0);
}

#[tokio::test]
async fn test_muted_user_skipped_but_still_subscribed() {
    let store = Arc::new(MockMessageStore::new());
    let (room, mutes) = spawn_room(store);

    let alice = UserId::new();
    let bob = UserId::new();
    let (alice_conn, mut alice_rx) = spawn_subscriber(alice);
    let (bob_conn, mut bob_rx) = spawn_subscriber(bob);
    room.subscribe(alice_conn).await.expect("subscribe");
    room.subscribe(bob_conn).await.expect("subscribe");

    mutes.mute(bob, room.room_id());

    room.publish(alice, MessageKind::Text, "while muted".to_string())
        .await
        .expect("publish");

    // Alice receives, Bob does not
    assert!(matches!(
        alice_rx.recv().await,
        Some(ServerFrame::Message { .. })
    ));
    assert!(bob_rx.try_recv().is_err());

    // Unmute: Bob resumes receiving without resubscribing
    mutes.unmute(bob, room.room_id());
    room.publish(alice, MessageKind::Text, "after unmute".to_string())
        .await
        .expect("publish");

    match bob_rx.recv().await.expect("frame after unmute") {
        ServerFrame::Message { body, .. } => assert_eq!(body, "after unmute"),
        other => panic!("unexpected frame: {other:?}"),
    }
    assert_eq!(room.subscriber_count().await.expect("count"), 2);
}

#[tokio::test]
async fn test_sender_mute_suppresses_own_echo() {
    let store = Arc::new(MockMessageStore::new());
    let (room, mutes) = spawn_room(store);

    let alice = UserId::new();
    let (alice_conn, mut alice_rx) = spawn_subscriber(alice);
    room.subscribe(alice_conn).await.expect("subscribe");

    mutes.mute(alice, room.room_id());

    // Persisted and acked, but no echo to the sender's own device
    let result = room
        .publish(alice, MessageKind::Text, "silent send".to_string())
        .await;
    assert!(result.is_ok());
    assert!(alice_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_room_fifo_order() {
    let store = Arc::new(MockMessageStore::new());
    let (room, _mutes) = spawn_room(store);

    let alice = UserId::new();
    let (conn, mut rx) = spawn_subscriber(UserId::new());
    room.subscribe(conn).await.expect("subscribe");

    for i in 0..10 {
        room.publish(alice, MessageKind::Text, format!("msg {i}"))
            .await
            .expect("publish");
    }

    let mut last_id = MessageId::ZERO;
    for i in 0..10 {
        match rx.recv().await.expect("frame") {
            ServerFrame::Message {
                message_id, body, ..
            } => {
                assert_eq!(body, format!("msg {i}"), "delivery order matches send order");
                assert!(message_id > last_id, "IDs increase monotonically");
                last_id = message_id;
            }
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let store = Arc::new(MockMessageStore::new());
    let (room, _mutes) = spawn_room(store);

    let bob = UserId::new();
    let (bob_conn, mut bob_rx) = spawn_subscriber(bob);
    let connection_id = bob_conn.connection_id();
    room.subscribe(bob_conn).await.expect("subscribe");
    room.unsubscribe(connection_id).await.expect("unsubscribe");

    room.publish(UserId::new(), MessageKind::Text, "after leave".to_string())
        .await
        .expect("publish");

    assert!(bob_rx.try_recv().is_err());
    assert_eq!(room.subscriber_count().await.expect("count"), 0);
}

#[tokio::test]
async fn test_history_returns_messages() {
    let store = Arc::new(MockMessageStore::new());
    let (room, _mutes) = spawn_room(store);

    let alice = UserId::new();
    room.publish(alice, MessageKind::Text, "one".to_string())
        .await
        .expect("publish");
    room.publish(alice, MessageKind::System, "two".to_string())
        .await
        .expect("publish");

    let history = room.history(50).await.expect("history");
    assert_eq!(history.len(), 2);
    let bodies: Vec<&str> = history.iter().map(|m| m.body.as_str()).collect();
    assert_eq!(bodies, vec!["one", "two"]);
    let kinds: Vec<MessageKind> = history.iter().map(|m| m.kind).collect();
    assert_eq!(kinds, vec![MessageKind::Text, MessageKind::System]);
}

#[tokio::test]
async fn test_message_kind_reaches_subscribers() {
    let store = Arc::new(MockMessageStore::new());
    let (room, _mutes) = spawn_room(store);

    let (conn, mut rx) = spawn_subscriber(UserId::new());
    room.subscribe(conn).await.expect("subscribe");

    room.publish(UserId::new(), MessageKind::System, "room archived".to_string())
        .await
        .expect("publish");

    match rx.recv().await.expect("frame") {
        ServerFrame::Message { kind, body, .. } => {
            assert_eq!(kind, MessageKind::System);
            assert_eq!(body, "room archived");
        }
        other => panic!("unexpected frame: {other:?}"),
    }
}
