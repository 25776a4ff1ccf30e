//! Search index integration.
//!
//! The [`SearchIndex`] trait abstracts the search backend's document API.
//! Indexing is strictly best-effort and asynchronous: nothing on the live
//! fanout path ever waits on the index, and an unreachable backend only
//! delays searchability, never delivery.

pub mod client;
pub mod sync;

pub use client::HttpSearchIndex;
pub use sync::{SearchSynchronizer, SyncEvent, SyncNotifier, SYNC_CURSOR_NAME};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MessageId, RoomId, UserId};
use serde::Serialize;

use crate::errors::ChatError;
use crate::store::{MessageKind, StoredMessage};

/// A message document as stored in the search index.
///
/// Keyed by message ID, so re-indexing the same message is a no-op
/// overwrite and the whole pipeline stays idempotent.
#[derive(Debug, Clone, Serialize)]
pub struct IndexDocument {
    /// Store-assigned message ID (document key).
    pub message_id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Message sender.
    pub sender_id: UserId,
    /// Message kind, for filtered searches.
    pub kind: MessageKind,
    /// Full-text body.
    pub body: String,
    /// Persistence timestamp.
    pub created_at: DateTime<Utc>,
}

impl From<&StoredMessage> for IndexDocument {
    fn from(msg: &StoredMessage) -> Self {
        IndexDocument {
            message_id: msg.id,
            room_id: msg.room_id,
            sender_id: msg.sender_id,
            kind: msg.kind,
            body: msg.body.clone(),
            created_at: msg.created_at,
        }
    }
}

/// Per-document outcome of a bulk upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// Document was indexed (created or overwritten).
    Indexed,
    /// Backend rejected this document.
    Failed,
}

/// Search backend document API.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// Create the index if it does not already exist. Idempotent.
    async fn ensure_index(&self) -> Result<(), ChatError>;

    /// Upsert a batch of documents, keyed by message ID.
    ///
    /// Returns one outcome per input document, in input order. A transport
    /// failure for the whole request is an `Err`; per-document rejections
    /// come back as [`IndexOutcome::Failed`].
    async fn bulk_upsert(&self, docs: &[IndexDocument]) -> Result<Vec<IndexOutcome>, ChatError>;

    /// Remove a document. Missing documents are not an error.
    async fn delete(&self, id: MessageId) -> Result<(), ChatError>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_index_document_from_stored_message() {
        let msg = StoredMessage {
            id: MessageId(7),
            room_id: RoomId::new(),
            sender_id: UserId::new(),
            kind: MessageKind::Text,
            body: "searchable text".to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };

        let doc = IndexDocument::from(&msg);
        assert_eq!(doc.message_id, MessageId(7));
        assert_eq!(doc.room_id, msg.room_id);
        assert_eq!(doc.kind, MessageKind::Text);
        assert_eq!(doc.body, "searchable text");
    }
}
