//! `RoomActor` - per-room actor that owns the subscriber set.
//!
//! Each `RoomActor`:
//! - Owns the authoritative subscriber set for one room
//! - Serializes publishes, so room delivery order matches persistence order
//! - Applies per-user mute filtering at delivery time
//!
//! # Persist-then-deliver
//!
//! A publish is durably stored before any delivery is attempted. If the
//! store rejects the message, the sender gets a failure and nobody
//! receives anything. Once stored, the sender's ack resolves and fanout
//! proceeds; per-connection failures from that point disconnect the
//! failing connection and never reach the sender.

use crate::errors::ChatError;

use super::connection::ConnectionHandle;
use super::messages::RoomMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConnectionId, MessageId, RoomId, UserId};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::mute::MuteRegistry;
use crate::search::SyncNotifier;
use crate::store::{MessageKind, MessageStore, NewMessage, StoredMessage};
use crate::transport::ServerFrame;

/// Default channel buffer size for the room mailbox.
const ROOM_CHANNEL_BUFFER: usize = 500;

/// Handle to a `RoomActor`.
#[derive(Clone, Debug)]
pub struct RoomHandle {
    sender: mpsc::Sender<RoomMessage>,
    cancel_token: CancellationToken,
    room_id: RoomId,
}

impl RoomHandle {
    /// Get the room ID.
    #[must_use]
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Publish a message to the room.
    ///
    /// Resolves with the persisted message ID once storage succeeds;
    /// fanout continues asynchronously.
    pub async fn publish(
        &self,
        sender_id: UserId,
        kind: MessageKind,
        body: String,
    ) -> Result<MessageId, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Publish {
                sender_id,
                kind,
                body,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Subscribe a connection to this room.
    pub async fn subscribe(&self, connection: ConnectionHandle) -> Result<(), ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::Subscribe {
                connection,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Unsubscribe a connection (fire-and-forget).
    pub async fn unsubscribe(&self, connection_id: ConnectionId) -> Result<(), ChatError> {
        self.sender
            .send(RoomMessage::Unsubscribe { connection_id })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))
    }

    /// Fetch recent history, oldest first.
    pub async fn history(&self, limit: u32) -> Result<Vec<StoredMessage>, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::History {
                limit,
                respond_to: tx,
            })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))?
    }

    /// Current subscriber count (used by the idle reaper).
    pub async fn subscriber_count(&self) -> Result<usize, ChatError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.sender
            .send(RoomMessage::SubscriberCount { respond_to: tx })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))?;

        rx.await
            .map_err(|e| ChatError::Internal(format!("response receive failed: {e}")))
    }

    /// Cancel the room actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `RoomActor` implementation.
pub struct RoomActor {
    /// Room ID.
    room_id: RoomId,
    /// Message receiver.
    receiver: mpsc::Receiver<RoomMessage>,
    /// Cancellation token (child of controller's token).
    cancel_token: CancellationToken,
    /// Subscribed connections by ID.
    subscribers: HashMap<ConnectionId, ConnectionHandle>,
    /// Durable message store.
    store: Arc<dyn MessageStore>,
    /// Shared mute registry, consulted per subscriber at delivery time.
    mutes: Arc<MuteRegistry>,
    /// Search synchronizer notification handle.
    sync: SyncNotifier,
    /// Shared actor metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl RoomActor {
    /// Spawn a new room actor.
    ///
    /// Returns a handle and the task join handle.
    pub fn spawn(
        room_id: RoomId,
        cancel_token: CancellationToken,
        store: Arc<dyn MessageStore>,
        mutes: Arc<MuteRegistry>,
        sync: SyncNotifier,
        metrics: Arc<ActorMetrics>,
    ) -> (RoomHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(ROOM_CHANNEL_BUFFER);

        let actor = Self {
            room_id,
            receiver,
            cancel_token: cancel_token.clone(),
            subscribers: HashMap::new(),
            store,
            mutes,
            sync,
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Room, room_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = RoomHandle {
            sender,
            cancel_token,
            room_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(skip_all, name = "chat.actor.room", fields(room_id = %self.room_id))]
    async fn run(mut self) {
        info!(
            target: "chat.actor.room",
            room_id = %self.room_id,
            "RoomActor started"
        );
        self.metrics.room_created();

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    info!(
                        target: "chat.actor.room",
                        room_id = %self.room_id,
                        "RoomActor received cancellation signal"
                    );
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            self.handle_message(message).await;
                            self.mailbox.record_dequeue();
                        }
                        None => {
                            info!(
                                target: "chat.actor.room",
                                room_id = %self.room_id,
                                "RoomActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.room_removed();
        info!(
            target: "chat.actor.room",
            room_id = %self.room_id,
            subscribers = self.subscribers.len(),
            messages_processed = self.mailbox.messages_processed(),
            "RoomActor stopped"
        );
    }

    /// Handle a single message.
    async fn handle_message(&mut self, message: RoomMessage) {
        match message {
            RoomMessage::Publish {
                sender_id,
                kind,
                body,
                respond_to,
            } => {
                let result = self.handle_publish(sender_id, kind, body).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::Subscribe {
                connection,
                respond_to,
            } => {
                let result = self.handle_subscribe(connection);
                let _ = respond_to.send(result);
            }

            RoomMessage::Unsubscribe { connection_id } => {
                self.handle_unsubscribe(connection_id);
            }

            RoomMessage::History { limit, respond_to } => {
                let result = self.store.room_history(self.room_id, limit).await;
                let _ = respond_to.send(result);
            }

            RoomMessage::SubscriberCount { respond_to } => {
                let _ = respond_to.send(self.subscribers.len());
            }
        }
    }

    /// Persist a message, then fan it out.
    #[instrument(skip_all, fields(room_id = %self.room_id, sender_id = %sender_id))]
    async fn handle_publish(
        &mut self,
        sender_id: UserId,
        kind: MessageKind,
        body: String,
    ) -> Result<MessageId, ChatError> {
        // Persist first; a store failure aborts before anyone sees the message
        let stored = self
            .store
            .append(NewMessage {
                room_id: self.room_id,
                sender_id,
                kind,
                body,
            })
            .await?;

        debug!(
            target: "chat.actor.room",
            room_id = %self.room_id,
            message_id = %stored.id,
            "Message persisted, fanning out"
        );

        // Best-effort incremental indexing; the sweep catches drops
        self.sync.notify_upsert(stored.clone());

        self.fanout(&stored);

        Ok(stored.id)
    }

    /// Deliver a stored message to every eligible subscriber.
    ///
    /// Mute filtering is per user: all devices of a muted user are skipped,
    /// including the sender's own if the sender muted this room. A failed
    /// delivery removes that one subscriber and affects nobody else.
    fn fanout(&mut self, stored: &StoredMessage) {
        let frame = ServerFrame::from(stored);
        let mut failed: Vec<ConnectionId> = Vec::new();

        for (connection_id, subscriber) in &self.subscribers {
            if self.mutes.is_muted(subscriber.user_id(), self.room_id) {
                continue;
            }

            match subscriber.try_deliver(frame.clone()) {
                Ok(()) => self.metrics.record_fanout(),
                Err(_) => {
                    // try_deliver already cancelled the connection on overflow
                    failed.push(*connection_id);
                }
            }
        }

        for connection_id in failed {
            warn!(
                target: "chat.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Removing failed subscriber"
            );
            self.subscribers.remove(&connection_id);
            self.metrics.record_overflow_disconnect();
        }
    }

    /// Add a connection to the subscriber set.
    fn handle_subscribe(&mut self, connection: ConnectionHandle) -> Result<(), ChatError> {
        let connection_id = connection.connection_id();
        debug!(
            target: "chat.actor.room",
            room_id = %self.room_id,
            connection_id = %connection_id,
            user_id = %connection.user_id(),
            "Connection subscribed"
        );
        self.subscribers.insert(connection_id, connection);
        Ok(())
    }

    /// Remove a connection from the subscriber set.
    fn handle_unsubscribe(&mut self, connection_id: ConnectionId) {
        if self.subscribers.remove(&connection_id).is_some() {
            debug!(
                target: "chat.actor.room",
                room_id = %self.room_id,
                connection_id = %connection_id,
                "Connection unsubscribed"
            );
        }
    }
}

