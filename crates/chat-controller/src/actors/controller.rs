//! `ChatControllerActor` - singleton root of the actor hierarchy.
//!
//! The controller:
//! - Owns the room map, spawning a `RoomActor` on first use of a room
//! - Reaps rooms that have been empty for a while
//! - Detects panicked room tasks and clears them from the map
//! - Propagates shutdown through child cancellation tokens

use crate::errors::ChatError;

use super::messages::{ControllerMessage, ControllerStats};
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};
use super::room::{RoomActor, RoomHandle};

use common::types::RoomId;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::mute::MuteRegistry;
use crate::search::SyncNotifier;
use crate::store::MessageStore;

/// Default channel buffer size for the controller mailbox.
const CONTROLLER_CHANNEL_BUFFER: usize = 500;

/// How often to sweep for idle rooms and dead tasks.
const ROOM_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// A room must be empty this long before it is reaped.
const ROOM_IDLE_AFTER: Duration = Duration::from_secs(60);

/// Handle to the `ChatControllerActor`.
#[derive(Clone, Debug)]
pub struct ControllerHandle {
    sender: mpsc::Sender<ControllerMessage>,
    cancel_token: CancellationToken,
}

impl ControllerHandle {
    /// Get the room actor for a room, spawning it if absent.
    pub async fn get_or_create_room(&self, room_id: RoomId) -> Result<RoomHandle, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetOrCreateRoom {
                room_id,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Controller statistics snapshot.
    pub async fn stats(&self) -> Result<ControllerStats, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(ControllerMessage::GetStats { respond_to: tx })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the controller and, through child tokens, every actor under it.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Get a child token for sibling actors (connections, calls).
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

/// A spawned room and its task handle.
struct ManagedRoom {
    handle: RoomHandle,
    task: JoinHandle<()>,
    /// When the room was last observed non-empty (or created).
    last_active: Instant,
}

/// The `ChatControllerActor` implementation.
pub struct ChatControllerActor {
    /// Message receiver.
    receiver: mpsc::Receiver<ControllerMessage>,
    /// Root cancellation token.
    cancel_token: CancellationToken,
    /// Live rooms by ID.
    rooms: HashMap<RoomId, ManagedRoom>,
    /// Durable message store, shared into each room.
    store: Arc<dyn MessageStore>,
    /// Shared mute registry.
    mutes: Arc<MuteRegistry>,
    /// Search synchronizer notification handle.
    sync: SyncNotifier,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl ChatControllerActor {
    /// Spawn the controller.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        cancel_token: CancellationToken,
        store: Arc<dyn MessageStore>,
        mutes: Arc<MuteRegistry>,
        sync: SyncNotifier,
        metrics: Arc<ActorMetrics>,
    ) -> (ControllerHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(CONTROLLER_CHANNEL_BUFFER);

        let actor = Self {
            receiver,
            cancel_token: cancel_token.clone(),
            rooms: HashMap::new(),
            store,
            mutes,
            sync,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Controller, "chat-controller"),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ControllerHandle {
            sender,
            cancel_token,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "chat.actor.controller")]
    async fn run(mut self) {
        info!(target: "chat.actor.controller", "ChatControllerActor started");

        let mut sweep = tokio::time::interval(ROOM_SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "chat.actor.controller",
                        rooms = self.rooms.len(),
                        "ChatControllerActor received cancellation signal"
                    );
                    self.graceful_shutdown().await;
                    break;
                }

                // Reap idle rooms and clear dead tasks
                _ = sweep.tick() => {
                    self.sweep_rooms().await;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message);
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "chat.actor.controller",
                                "ChatControllerActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        info!(
            target: "chat.actor.controller",
            messages_processed = self.mailbox.messages_processed(),
            "ChatControllerActor stopped"
        );
    }

    /// Handle a single message.
    fn handle_message(&mut self, message: ControllerMessage) {
        match message {
            ControllerMessage::GetOrCreateRoom {
                room_id,
                respond_to,
            } => {
                let result = self.get_or_create_room(room_id);
                let _ = respond_to.send(result);
            }

            ControllerMessage::GetStats { respond_to } => {
                let _ = respond_to.send(ControllerStats {
                    active_rooms: self.rooms.len(),
                });
            }
        }
    }

    /// Look up or spawn the room actor for `room_id`.
    fn get_or_create_room(&mut self, room_id: RoomId) -> Result<RoomHandle, ChatError> {
        if self.cancel_token.is_cancelled() {
            return Err(ChatError::Draining);
        }

        if let Some(managed) = self.rooms.get_mut(&room_id) {
            if !managed.handle.is_cancelled() {
                managed.last_active = Instant::now();
                return Ok(managed.handle.clone());
            }
            // Cancelled but not yet swept; replace it below
            self.rooms.remove(&room_id);
        }

        debug!(
            target: "chat.actor.controller",
            room_id = %room_id,
            "Spawning room actor"
        );

        let (handle, task) = RoomActor::spawn(
            room_id,
            self.cancel_token.child_token(),
            Arc::clone(&self.store),
            Arc::clone(&self.mutes),
            self.sync.clone(),
            Arc::clone(&self.metrics),
        );

        self.rooms.insert(
            room_id,
            ManagedRoom {
                handle: handle.clone(),
                task,
                last_active: Instant::now(),
            },
        );

        Ok(handle)
    }

    /// Reap idle rooms and clear panicked tasks.
    async fn sweep_rooms(&mut self) {
        // Dead tasks first: a finished task for a non-cancelled room is a panic
        let mut dead: Vec<RoomId> = Vec::new();
        for (room_id, managed) in &self.rooms {
            if managed.task.is_finished() {
                dead.push(*room_id);
                if !managed.handle.is_cancelled() {
                    self.metrics.record_panic(ActorType::Room);
                    warn!(
                        target: "chat.actor.controller",
                        room_id = %room_id,
                        "Room task finished unexpectedly, clearing from map"
                    );
                }
            }
        }
        for room_id in dead {
            self.rooms.remove(&room_id);
        }

        // Idle reaping: empty for longer than the idle window
        let mut idle: Vec<RoomId> = Vec::new();
        for (room_id, managed) in &mut self.rooms {
            match managed.handle.subscriber_count().await {
                Ok(0) => {
                    if managed.last_active.elapsed() > ROOM_IDLE_AFTER {
                        idle.push(*room_id);
                    }
                }
                Ok(_) => {
                    managed.last_active = Instant::now();
                }
                Err(_) => {
                    // Unresponsive room, let the dead-task pass collect it
                }
            }
        }
        for room_id in idle {
            if let Some(managed) = self.rooms.remove(&room_id) {
                info!(
                    target: "chat.actor.controller",
                    room_id = %room_id,
                    "Reaping idle room"
                );
                managed.handle.cancel();
            }
        }
    }

    /// Cancel every room and wait for their tasks to finish.
    async fn graceful_shutdown(&mut self) {
        for managed in self.rooms.values() {
            managed.handle.cancel();
        }
        for (room_id, managed) in self.rooms.drain() {
            if managed.task.await.is_err() {
                warn!(
                    target: "chat.actor.controller",
                    room_id = %room_id,
                    "Room task panicked during shutdown"
                );
            }
        }
    }
}

