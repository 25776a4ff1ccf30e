//! Message persistence layer.
//!
//! The [`MessageStore`] trait is the single seam between the fanout path
//! and durable storage. Messages are persisted before any delivery is
//! attempted; the store-assigned [`MessageId`] is monotonically increasing
//! and doubles as the search synchronizer's cursor value.

pub mod postgres;

pub use postgres::PostgresMessageStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MessageId, RoomId, UserId};
use serde::{Deserialize, Serialize};

use crate::errors::ChatError;

/// Kind of a chat message.
///
/// `Text` is user-authored content; `System` is service-generated (join
/// notices and the like). The kind is persisted and carried on the wire
/// so clients can render the two differently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// User-authored message body.
    Text,
    /// Service-generated notice.
    System,
}

impl MessageKind {
    /// Stable string form, as stored in the `kind` column.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::System => "system",
        }
    }

    /// Parse the stored string form.
    pub fn parse(s: &str) -> Result<Self, ChatError> {
        match s {
            "text" => Ok(MessageKind::Text),
            "system" => Ok(MessageKind::System),
            other => Err(ChatError::Internal(format!(
                "unknown message kind: {other}"
            ))),
        }
    }
}

/// A persisted chat message.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMessage {
    /// Store-assigned identifier (monotonic per store instance).
    pub id: MessageId,
    /// Room the message was sent to.
    pub room_id: RoomId,
    /// Authenticated sender.
    pub sender_id: UserId,
    /// Message kind.
    pub kind: MessageKind,
    /// Message body.
    pub body: String,
    /// When the store accepted the message.
    pub created_at: DateTime<Utc>,
    /// Soft-delete timestamp (None = visible).
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A message accepted from a client, not yet persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    /// Room the message is addressed to.
    pub room_id: RoomId,
    /// Authenticated sender.
    pub sender_id: UserId,
    /// Message kind.
    pub kind: MessageKind,
    /// Message body.
    pub body: String,
}

/// Durable message storage.
///
/// Implementations must assign strictly increasing [`MessageId`] values
/// within a single store instance; the synchronizer's resumability
/// depends on it.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message and return the stored record with its assigned ID.
    ///
    /// Failure here means the message was not delivered to anyone and the
    /// sender must be told to retry.
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, ChatError>;

    /// List up to `limit` visible messages with ID strictly greater than
    /// `cursor`, ordered by ID ascending. Used by the search synchronizer.
    async fn list_since(
        &self,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError>;

    /// Most recent visible messages for a room, newest last.
    async fn room_history(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError>;

    /// Count visible messages with ID strictly greater than `cursor`.
    async fn count_since(&self, cursor: MessageId) -> Result<u64, ChatError>;

    /// Soft-delete a message, only if `sender_id` authored it. Returns
    /// false if no visible message matched.
    async fn mark_deleted(&self, id: MessageId, sender_id: UserId) -> Result<bool, ChatError>;

    /// Load the synchronizer cursor, or [`MessageId::ZERO`] if none saved.
    async fn load_cursor(&self, sync_name: &str) -> Result<MessageId, ChatError>;

    /// Persist the synchronizer cursor.
    async fn save_cursor(&self, sync_name: &str, cursor: MessageId) -> Result<(), ChatError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_kind_string_round_trip() {
        for kind in [MessageKind::Text, MessageKind::System] {
            assert_eq!(MessageKind::parse(kind.as_str()).unwrap(), kind);
        }
    }

    #[test]
    fn test_message_kind_rejects_unknown() {
        assert!(MessageKind::parse("carrier_pigeon").is_err());
    }
}
