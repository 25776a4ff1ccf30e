//! WebSocket transport layer.
//!
//! Defines the JSON wire protocol (client and server frames) and the
//! axum-based WebSocket server that bridges sockets to the actor system.

pub mod ws;

pub use ws::{ws_router, AppState};

use chrono::{DateTime, Utc};
use common::types::{CallId, MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::store::{MessageKind, StoredMessage};

/// Media requested for a call. Carried verbatim from the invite to the
/// callee's ring frame; the core never inspects it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CallMedia {
    /// Audio-only call.
    Voice,
    /// Audio + video call.
    Video,
}

/// Frames sent by clients.
///
/// Tagged JSON: `{"type": "chat", "room_id": "...", "body": "..."}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Send a chat message to a room.
    Chat { room_id: RoomId, body: String },
    /// Subscribe this connection to a room's fanout.
    Subscribe { room_id: RoomId },
    /// Unsubscribe this connection from a room.
    Unsubscribe { room_id: RoomId },
    /// Mute a room for this user (all devices).
    Mute { room_id: RoomId },
    /// Unmute a room for this user.
    Unmute { room_id: RoomId },
    /// Fetch recent history for a room.
    History { room_id: RoomId, limit: Option<u32> },
    /// Soft-delete a message this user sent.
    Delete { message_id: MessageId },
    /// Invite another user to a call.
    Invite {
        callee_id: UserId,
        media: CallMedia,
    },
    /// Accept a ringing call (callee only).
    Accept { call_id: CallId },
    /// Reject a ringing call (callee only).
    Reject { call_id: CallId },
    /// Hang up a ringing or active call (either party).
    Hangup { call_id: CallId },
}

/// Frames sent by the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat message delivered through room fanout.
    Message {
        message_id: MessageId,
        room_id: RoomId,
        sender_id: UserId,
        kind: MessageKind,
        body: String,
        created_at: DateTime<Utc>,
    },
    /// Positive acknowledgement of a client request.
    Ack {
        /// The persisted message ID, for chat sends.
        #[serde(skip_serializing_if = "Option::is_none")]
        message_id: Option<MessageId>,
        /// The call session ID, for invites.
        #[serde(skip_serializing_if = "Option::is_none")]
        call_id: Option<CallId>,
    },
    /// A request failed. `code` follows the error taxonomy.
    Error { code: i32, message: String },
    /// Room history response, oldest first.
    History {
        room_id: RoomId,
        messages: Vec<HistoryEntry>,
    },
    /// An incoming call invite (delivered to the callee's devices).
    CallInvite {
        call_id: CallId,
        caller_id: UserId,
        media: CallMedia,
    },
    /// The callee accepted (delivered to the caller's devices).
    CallAccepted { call_id: CallId },
    /// The callee rejected.
    CallRejected { call_id: CallId },
    /// The other party hung up.
    CallHungUp { call_id: CallId },
    /// The ring window elapsed with no answer (delivered to the caller).
    CallTimeout { call_id: CallId },
}

impl ServerFrame {
    /// Plain acknowledgement with no attached IDs.
    #[must_use]
    pub fn ack() -> Self {
        ServerFrame::Ack {
            message_id: None,
            call_id: None,
        }
    }

    /// Acknowledgement of a persisted chat message.
    #[must_use]
    pub fn ack_message(id: MessageId) -> Self {
        ServerFrame::Ack {
            message_id: Some(id),
            call_id: None,
        }
    }

    /// Acknowledgement of a started call.
    #[must_use]
    pub fn ack_call(id: CallId) -> Self {
        ServerFrame::Ack {
            message_id: None,
            call_id: Some(id),
        }
    }

    /// Error frame for a failed request, with internal details stripped.
    #[must_use]
    pub fn error(err: &crate::errors::ChatError) -> Self {
        ServerFrame::Error {
            code: err.error_code(),
            message: err.client_message(),
        }
    }
}

/// A single message in a history response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEntry {
    pub message_id: MessageId,
    pub sender_id: UserId,
    pub kind: MessageKind,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for HistoryEntry {
    fn from(msg: &StoredMessage) -> Self {
        HistoryEntry {
            message_id: msg.id,
            sender_id: msg.sender_id,
            kind: msg.kind,
            body: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}

impl From<&StoredMessage> for ServerFrame {
    fn from(msg: &StoredMessage) -> Self {
        ServerFrame::Message {
            message_id: msg.id,
            room_id: msg.room_id,
            sender_id: msg.sender_id,
            kind: msg.kind,
            body: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}
