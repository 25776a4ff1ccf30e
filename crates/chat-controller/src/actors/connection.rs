//! `ConnectionActor` - per-WebSocket connection actor.
//!
//! Each `ConnectionActor`:
//! - Handles exactly one WebSocket connection for one authenticated user
//! - Owns the bounded outbound queue between fanout and the socket writer
//! - Forwards server frames to the socket writer task
//!
//! # Backpressure
//!
//! The mailbox is the per-connection queue. Fanout uses `try_deliver`,
//! which never blocks: a full queue means the client is not keeping up,
//! and the connection is cancelled rather than allowed to stall the room.
//!
//! # Lifecycle
//!
//! 1. Spawned when the WebSocket handshake completes
//! 2. Runs until the socket closes, the queue overflows, or shutdown
//! 3. Cancellation via child token propagates from the controller

use crate::errors::ChatError;

use super::messages::ConnectionMessage;
use super::metrics::{ActorMetrics, ActorType, MailboxMonitor};

use common::types::{ConnectionId, UserId};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Handle to a `ConnectionActor`.
#[derive(Clone, Debug)]
pub struct ConnectionHandle {
    sender: mpsc::Sender<ConnectionMessage>,
    cancel_token: CancellationToken,
    connection_id: ConnectionId,
    user_id: UserId,
}

impl ConnectionHandle {
    /// Get the connection ID.
    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    /// Get the authenticated user.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Queue a frame for delivery without blocking.
    ///
    /// A full queue cancels the connection: a client that cannot drain its
    /// queue is disconnected so one slow consumer never stalls fanout.
    pub fn try_deliver(&self, frame: crate::transport::ServerFrame) -> Result<(), ChatError> {
        match self.sender.try_send(ConnectionMessage::Deliver { frame }) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!(
                    target: "chat.actor.connection",
                    connection_id = %self.connection_id,
                    user_id = %self.user_id,
                    "Outbound queue overflow, disconnecting slow client"
                );
                self.cancel_token.cancel();
                Err(ChatError::Delivery("outbound queue overflow".to_string()))
            }
            Err(TrySendError::Closed(_)) => {
                Err(ChatError::Delivery("connection closed".to_string()))
            }
        }
    }

    /// Close the connection.
    pub async fn close(&self, reason: String) -> Result<(), ChatError> {
        self.sender
            .send(ConnectionMessage::Close { reason })
            .await
            .map_err(|e| ChatError::Internal(format!("channel send failed: {e}")))
    }

    /// Cancel the connection actor.
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    /// Check if the actor is cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }
}

/// The `ConnectionActor` implementation.
pub struct ConnectionActor {
    /// Connection ID.
    connection_id: ConnectionId,
    /// Authenticated user.
    user_id: UserId,
    /// Message receiver (doubles as the bounded outbound queue).
    receiver: mpsc::Receiver<ConnectionMessage>,
    /// Outlet to the socket writer task.
    outlet: mpsc::Sender<crate::transport::ServerFrame>,
    /// Cancellation token (child of controller's token).
    cancel_token: CancellationToken,
    /// Shared metrics.
    metrics: Arc<ActorMetrics>,
    /// Mailbox monitor.
    mailbox: MailboxMonitor,
}

impl ConnectionActor {
    /// Spawn a new connection actor.
    ///
    /// Returns a handle and the task join handle.
    ///
    /// # Arguments
    ///
    /// * `queue_capacity` - Bounded outbound queue size; overflow disconnects
    /// * `outlet` - Channel to the socket writer task
    pub fn spawn(
        connection_id: ConnectionId,
        user_id: UserId,
        queue_capacity: usize,
        outlet: mpsc::Sender<crate::transport::ServerFrame>,
        cancel_token: CancellationToken,
        metrics: Arc<ActorMetrics>,
    ) -> (ConnectionHandle, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(queue_capacity);

        let actor = Self {
            connection_id,
            user_id,
            receiver,
            outlet,
            cancel_token: cancel_token.clone(),
            metrics,
            mailbox: MailboxMonitor::new(ActorType::Connection, connection_id.to_string()),
        };

        let task_handle = tokio::spawn(actor.run());

        let handle = ConnectionHandle {
            sender,
            cancel_token,
            connection_id,
            user_id,
        };

        (handle, task_handle)
    }

    /// Run the actor message loop.
    #[instrument(
        skip_all,
        name = "chat.actor.connection",
        fields(
            connection_id = %self.connection_id,
            user_id = %self.user_id
        )
    )]
    async fn run(mut self) {
        debug!(
            target: "chat.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            "ConnectionActor started"
        );
        self.metrics.connection_created();

        loop {
            tokio::select! {
                // Handle cancellation
                () = self.cancel_token.cancelled() => {
                    debug!(
                        target: "chat.actor.connection",
                        connection_id = %self.connection_id,
                        "ConnectionActor received cancellation signal"
                    );
                    break;
                }

                // Handle messages
                msg = self.receiver.recv() => {
                    match msg {
                        Some(message) => {
                            self.mailbox.record_enqueue();
                            let should_exit = self.handle_message(message).await;
                            self.mailbox.record_dequeue();

                            if should_exit {
                                break;
                            }
                        }
                        None => {
                            debug!(
                                target: "chat.actor.connection",
                                connection_id = %self.connection_id,
                                "ConnectionActor channel closed, exiting"
                            );
                            break;
                        }
                    }
                }
            }
        }

        self.metrics.connection_closed();
        info!(
            target: "chat.actor.connection",
            connection_id = %self.connection_id,
            user_id = %self.user_id,
            frames_delivered = self.mailbox.messages_processed(),
            "ConnectionActor stopped"
        );
    }

    /// Handle a single message. Returns true if the actor should exit.
    async fn handle_message(&mut self, message: ConnectionMessage) -> bool {
        match message {
            ConnectionMessage::Deliver { frame } => {
                // Writer gone means the socket is dead; exit and let the
                // transport layer run deregistration
                if self.outlet.send(frame).await.is_err() {
                    debug!(
                        target: "chat.actor.connection",
                        connection_id = %self.connection_id,
                        "Socket writer gone, exiting"
                    );
                    return true;
                }
                false
            }

            ConnectionMessage::Close { reason } => {
                info!(
                    target: "chat.actor.connection",
                    connection_id = %self.connection_id,
                    reason = %reason,
                    "Closing connection"
                );
                self.cancel_token.cancel();
                true
            }
        }
    }
}
