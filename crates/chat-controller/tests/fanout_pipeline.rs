//! End-to-end fanout tests through the controller actor hierarchy.
//!
//! Drives the full pipeline with in-memory mocks: controller spawns rooms,
//! connections subscribe, messages persist then fan out, mutes filter at
//! delivery time, and slow consumers are disconnected instead of stalling
//! the room.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use chat_controller::actors::{
    ActorMetrics, ChatControllerActor, ConnectionActor, ConnectionHandle, ControllerHandle,
};
use chat_controller::mute::MuteRegistry;
use chat_controller::search::{SearchIndex, SearchSynchronizer};
use chat_controller::store::{MessageKind, MessageStore};
use chat_controller::transport::ServerFrame;
use chat_test_utils::{MockMessageStore, MockSearchIndex};
use common::types::{ConnectionId, RoomId, UserId};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Pipeline {
    controller: ControllerHandle,
    store: Arc<MockMessageStore>,
    index: Arc<MockSearchIndex>,
    mutes: Arc<MuteRegistry>,
    metrics: Arc<ActorMetrics>,
}

fn spawn_pipeline() -> Pipeline {
    let store = Arc::new(MockMessageStore::new());
    let index = Arc::new(MockSearchIndex::new());
    let mutes = Arc::new(MuteRegistry::new());
    let metrics = ActorMetrics::new();
    let cancel = CancellationToken::new();

    let (sync, notifier) = SearchSynchronizer::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::clone(&index) as Arc<dyn SearchIndex>,
        100,
        Duration::from_secs(3600),
        cancel.child_token(),
    );
    tokio::spawn(sync.run());

    let (controller, _task) = ChatControllerActor::spawn(
        cancel,
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::clone(&mutes),
        notifier,
        Arc::clone(&metrics),
    );

    Pipeline {
        controller,
        store,
        index,
        mutes,
        metrics,
    }
}

/// Spawn a connection actor with a generously sized queue.
fn connect(
    user_id: UserId,
    metrics: &Arc<ActorMetrics>,
) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
    connect_with_capacity(user_id, 64, 64, metrics)
}

fn connect_with_capacity(
    user_id: UserId,
    queue_capacity: usize,
    outlet_capacity: usize,
    metrics: &Arc<ActorMetrics>,
) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
    let (outlet_tx, outlet_rx) = mpsc::channel(outlet_capacity);
    let (handle, _task) = ConnectionActor::spawn(
        ConnectionId::new(),
        user_id,
        queue_capacity,
        outlet_tx,
        CancellationToken::new(),
        Arc::clone(metrics),
    );
    (handle, outlet_rx)
}

fn body_of(frame: ServerFrame) -> String {
    match frame {
        ServerFrame::Message { body, .. } => body,
        other => panic!("expected message frame, got {other:?}"),
    }
}

#[tokio::test]
async fn test_publish_reaches_all_subscribers_and_index() {
    let pipeline = spawn_pipeline();
    let room_id = RoomId::new();
    let room = pipeline
        .controller
        .get_or_create_room(room_id)
        .await
        .expect("create room");

    let alice = UserId::new();
    let bob = UserId::new();
    let (alice_conn, mut alice_rx) = connect(alice, &pipeline.metrics);
    let (bob_conn, mut bob_rx) = connect(bob, &pipeline.metrics);
    room.subscribe(alice_conn).await.expect("subscribe alice");
    room.subscribe(bob_conn).await.expect("subscribe bob");

    let id = room
        .publish(alice, MessageKind::Text, "hello everyone".to_string())
        .await
        .expect("publish");

    // Persisted, then delivered to every subscriber including the sender
    assert_eq!(pipeline.store.message_count().await, 1);
    assert_eq!(body_of(alice_rx.recv().await.expect("alice frame")), "hello everyone");
    assert_eq!(body_of(bob_rx.recv().await.expect("bob frame")), "hello everyone");

    // The incremental path gets it into the search index
    tokio::time::timeout(Duration::from_secs(1), async {
        while !pipeline.index.contains(id) {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("message should be indexed");
}

#[tokio::test]
async fn test_store_outage_blocks_all_delivery() {
    let pipeline = spawn_pipeline();
    pipeline.store.set_append_failure(true);

    let room = pipeline
        .controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("create room");

    let bob = UserId::new();
    let (bob_conn, mut bob_rx) = connect(bob, &pipeline.metrics);
    room.subscribe(bob_conn).await.expect("subscribe");

    let result = room
        .publish(UserId::new(), MessageKind::Text, "lost".to_string())
        .await;
    assert!(result.is_err(), "sender sees the store failure");
    assert!(bob_rx.try_recv().is_err(), "nothing was delivered");
    assert_eq!(pipeline.index.document_count(), 0);

    // Store recovers; the pipeline picks up where it left off
    pipeline.store.set_append_failure(false);
    room.publish(UserId::new(), MessageKind::Text, "recovered".to_string())
        .await
        .expect("publish after recovery");
    assert_eq!(body_of(bob_rx.recv().await.expect("frame")), "recovered");
}

#[tokio::test]
async fn test_mute_filters_per_user_per_room() {
    let pipeline = spawn_pipeline();
    let room_a = pipeline
        .controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("room a");
    let room_b = pipeline
        .controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("room b");

    let alice = UserId::new();
    let bob = UserId::new();
    let (bob_a, mut bob_a_rx) = connect(bob, &pipeline.metrics);
    let (bob_b, mut bob_b_rx) = connect(bob, &pipeline.metrics);
    room_a.subscribe(bob_a).await.expect("subscribe a");
    room_b.subscribe(bob_b).await.expect("subscribe b");

    // Bob mutes room A only
    pipeline.mutes.mute(bob, room_a.room_id());

    room_a
        .publish(alice, MessageKind::Text, "in muted room".to_string())
        .await
        .expect("publish a");
    room_b
        .publish(alice, MessageKind::Text, "in other room".to_string())
        .await
        .expect("publish b");

    assert_eq!(body_of(bob_b_rx.recv().await.expect("room b frame")), "in other room");
    assert!(bob_a_rx.try_recv().is_err(), "muted room delivers nothing");

    // Both messages were persisted regardless of mutes
    assert_eq!(pipeline.store.message_count().await, 2);
}

#[tokio::test]
async fn test_slow_consumer_is_disconnected_not_blocking() {
    let pipeline = spawn_pipeline();
    let room = pipeline
        .controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("create room");

    let alice = UserId::new();
    let slow = UserId::new();

    let (alice_conn, mut alice_rx) = connect(alice, &pipeline.metrics);
    // Tiny queue, and the outlet is never drained: the writer stalls on the
    // first frame and the mailbox fills after that
    let (slow_conn, _slow_rx) = connect_with_capacity(slow, 2, 1, &pipeline.metrics);
    let slow_handle = slow_conn.clone();

    room.subscribe(alice_conn).await.expect("subscribe alice");
    room.subscribe(slow_conn).await.expect("subscribe slow");

    // Enough traffic to overflow the slow connection's queue
    for i in 0..10 {
        room.publish(alice, MessageKind::Text, format!("burst {i}"))
            .await
            .expect("publish");
        tokio::task::yield_now().await;
    }

    // The slow connection is cancelled and removed from the room
    tokio::time::timeout(Duration::from_secs(1), async {
        while !slow_handle.is_cancelled() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("slow connection should be cancelled on overflow");

    assert_eq!(room.subscriber_count().await.expect("count"), 1);

    // The healthy subscriber got every message, in order
    for i in 0..10 {
        assert_eq!(
            body_of(alice_rx.recv().await.expect("frame")),
            format!("burst {i}")
        );
    }

    // Later messages still flow to the survivors
    room.publish(alice, MessageKind::Text, "after overflow".to_string())
        .await
        .expect("publish");
    assert_eq!(body_of(alice_rx.recv().await.expect("frame")), "after overflow");
}

#[tokio::test]
async fn test_draining_controller_rejects_new_rooms() {
    let pipeline = spawn_pipeline();
    pipeline.controller.cancel();

    // Give the controller a moment to observe cancellation
    tokio::task::yield_now().await;

    let result = pipeline.controller.get_or_create_room(RoomId::new()).await;
    assert!(result.is_err(), "draining controller accepts no new rooms");
}
