//! Message types for actor mailboxes.
//!
//! Every request/response pair carries a `respond_to` oneshot; fire-and-
//! forget notifications omit it. Actors never share state, only messages.

use common::types::{CallId, ConnectionId, MessageId, RoomId, UserId};
use tokio::sync::oneshot;

use super::call::CallState;
use super::connection::ConnectionHandle;
use super::room::RoomHandle;
use crate::errors::ChatError;
use crate::store::{MessageKind, StoredMessage};
use crate::transport::{CallMedia, ServerFrame};

/// Messages handled by `RoomActor`.
#[derive(Debug)]
pub enum RoomMessage {
    /// Persist a chat message and fan it out to subscribers.
    ///
    /// The response resolves once the message is durably stored; delivery
    /// continues asynchronously and per-connection failures never surface
    /// here.
    Publish {
        sender_id: UserId,
        kind: MessageKind,
        body: String,
        respond_to: oneshot::Sender<Result<MessageId, ChatError>>,
    },
    /// Add a connection to this room's subscriber set.
    Subscribe {
        connection: ConnectionHandle,
        respond_to: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Remove a connection from the subscriber set.
    Unsubscribe { connection_id: ConnectionId },
    /// Fetch recent history, oldest first.
    History {
        limit: u32,
        respond_to: oneshot::Sender<Result<Vec<StoredMessage>, ChatError>>,
    },
    /// Current subscriber count (used by the idle reaper).
    SubscriberCount { respond_to: oneshot::Sender<usize> },
}

/// Messages handled by `ConnectionActor`.
#[derive(Debug)]
pub enum ConnectionMessage {
    /// Push a frame to the client.
    Deliver { frame: ServerFrame },
    /// Close the connection.
    Close { reason: String },
}

/// Messages handled by `ChatControllerActor`.
#[derive(Debug)]
pub enum ControllerMessage {
    /// Get the room actor for a room, spawning it if absent.
    GetOrCreateRoom {
        room_id: RoomId,
        respond_to: oneshot::Sender<Result<RoomHandle, ChatError>>,
    },
    /// Controller statistics snapshot.
    GetStats {
        respond_to: oneshot::Sender<ControllerStats>,
    },
}

/// Controller statistics snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ControllerStats {
    /// Rooms with a live actor.
    pub active_rooms: usize,
}

/// Messages handled by `CallActor`.
#[derive(Debug)]
pub enum CallMessage {
    /// Caller invites callee. Responds with the new call ID, or
    /// `DuplicateInvite` if the peer pair already has a live call.
    Invite {
        caller_id: UserId,
        callee_id: UserId,
        media: CallMedia,
        respond_to: oneshot::Sender<Result<CallId, ChatError>>,
    },
    /// Callee accepts a ringing call.
    Accept {
        call_id: CallId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Callee rejects a ringing call.
    Reject {
        call_id: CallId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Either party ends a ringing or active call.
    Hangup {
        call_id: CallId,
        user_id: UserId,
        respond_to: oneshot::Sender<Result<(), ChatError>>,
    },
    /// Internal: the ring window elapsed for a call.
    RingTimeout { call_id: CallId },
    /// Current state of a call session, if it is still live.
    GetState {
        call_id: CallId,
        respond_to: oneshot::Sender<Option<CallState>>,
    },
    /// Media kind of a call session, if it is still live.
    GetMedia {
        call_id: CallId,
        respond_to: oneshot::Sender<Option<CallMedia>>,
    },
}
