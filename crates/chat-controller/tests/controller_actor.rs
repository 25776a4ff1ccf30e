//! `ChatControllerActor` behavior tests.
//!
//! These live as integration tests rather than unit tests because they use
//! mocks from `chat-test-utils`, which depends on this crate; linking those
//! mocks from inside the library's own test target would pull in a second
//! copy of the crate whose trait impls do not match.
#![allow(clippy::unwrap_used, clippy::expect_used)]

use chat_controller::actors::{ActorMetrics, ChatControllerActor, ControllerHandle};
use chat_controller::mute::MuteRegistry;
use chat_controller::search::SearchSynchronizer;
use chat_controller::store::MessageStore;
use chat_test_utils::{MockMessageStore, MockSearchIndex};
use common::types::{RoomId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;


fn spawn_controller() -> (ControllerHandle, CancellationToken) {
    let store = Arc::new(MockMessageStore::new());
    let (_sync, notifier) = SearchSynchronizer::new(
        Arc::clone(&store) as Arc<dyn MessageStore>,
        Arc::new(MockSearchIndex::new()),
        100,
        Duration::from_secs(3600),
        CancellationToken::new(),
    );
    let cancel = CancellationToken::new();
    let (handle, _task) = ChatControllerActor::spawn(
        cancel.clone(),
        store,
        Arc::new(MuteRegistry::new()),
        notifier,
        ActorMetrics::new(),
    );
    (handle, cancel)
}

#[tokio::test]
async fn test_get_or_create_room_is_idempotent() {
    let (controller, _cancel) = spawn_controller();
    let room_id = RoomId::new();

    let first = controller
        .get_or_create_room(room_id)
        .await
        .expect("create room");
    let second = controller
        .get_or_create_room(room_id)
        .await
        .expect("same room");

    assert_eq!(first.room_id(), second.room_id());

    let stats = controller.stats().await.expect("stats");
    assert_eq!(stats.active_rooms, 1);
}

#[tokio::test]
async fn test_distinct_rooms_get_distinct_actors() {
    let (controller, _cancel) = spawn_controller();

    controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("room a");
    controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("room b");

    let stats = controller.stats().await.expect("stats");
    assert_eq!(stats.active_rooms, 2);
}

#[tokio::test]
async fn test_room_usable_through_controller() {
    let (controller, _cancel) = spawn_controller();
    let room = controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("create room");

    let id = room
        .publish(
            UserId::new(),
            chat_controller::store::MessageKind::Text,
            "via controller".to_string(),
        )
        .await
        .expect("publish");
    assert!(id.0 > 0);
}

#[tokio::test]
async fn test_cancellation_drains_rooms() {
    let (controller, cancel) = spawn_controller();
    let room = controller
        .get_or_create_room(RoomId::new())
        .await
        .expect("create room");

    cancel.cancel();

    // The room's child token is cancelled with the controller
    tokio::time::timeout(Duration::from_secs(1), async {
        while !room.is_cancelled() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("room should observe cancellation");
}
