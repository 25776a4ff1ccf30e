//! In-memory message store mock.
//!
//! Implements `MessageStore` with a `Vec` of messages and monotonically
//! increasing IDs starting at 1, matching the Postgres store's contract.
//!
//! # Example
//!
//! ```rust,ignore
//! use chat_test_utils::MockMessageStore;
//!
//! let store = MockMessageStore::new();
//! let stored = store.append(new_message).await.unwrap();
//! assert_eq!(stored.id.0, 1);
//!
//! // Simulate an outage
//! let store = MockMessageStore::new().with_append_failure();
//! assert!(store.append(new_message).await.is_err());
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chat_controller::errors::ChatError;
use chat_controller::store::{MessageKind, MessageStore, NewMessage, StoredMessage};
use chrono::Utc;
use common::types::{MessageId, RoomId, UserId};

/// In-memory mock of the durable message store.
#[derive(Debug, Clone)]
pub struct MockMessageStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug)]
struct Inner {
    /// Stored messages, in ID order.
    messages: Vec<StoredMessage>,
    /// Next ID to assign. IDs start at 1, like BIGSERIAL.
    next_id: i64,
    /// Saved synchronizer cursors by name.
    cursors: HashMap<String, i64>,
    /// When set, `append` fails with `StoreUnavailable`.
    fail_appends: bool,
}

impl Default for MockMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockMessageStore {
    /// Create a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                messages: Vec::new(),
                next_id: 1,
                cursors: HashMap::new(),
                fail_appends: false,
            })),
        }
    }

    /// Make every `append` fail, simulating a store outage.
    #[must_use]
    pub fn with_append_failure(self) -> Self {
        self.inner.lock().unwrap().fail_appends = true;
        self
    }

    /// Toggle append failures at runtime.
    pub fn set_append_failure(&self, fail: bool) {
        self.inner.lock().unwrap().fail_appends = fail;
    }

    /// Number of stored messages (including soft-deleted ones).
    pub async fn message_count(&self) -> usize {
        self.inner.lock().unwrap().messages.len()
    }

    /// Seed `count` messages into one room. Returns the assigned IDs.
    pub async fn seed_messages(&self, room_id: RoomId, sender_id: UserId, count: usize) -> Vec<MessageId> {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let stored = self
                .append(NewMessage {
                    room_id,
                    sender_id,
                    kind: MessageKind::Text,
                    body: format!("seeded message {i}"),
                })
                .await
                .expect("seed append should not fail");
            ids.push(stored.id);
        }
        ids
    }

    /// The saved cursor value for `sync_name`, if any.
    pub async fn saved_cursor(&self, sync_name: &str) -> Option<MessageId> {
        self.inner
            .lock()
            .unwrap()
            .cursors
            .get(sync_name)
            .copied()
            .map(MessageId)
    }
}

#[async_trait]
impl MessageStore for MockMessageStore {
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, ChatError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.fail_appends {
            return Err(ChatError::StoreUnavailable(
                "mock store is failing appends".to_string(),
            ));
        }

        let stored = StoredMessage {
            id: MessageId(inner.next_id),
            room_id: message.room_id,
            sender_id: message.sender_id,
            kind: message.kind,
            body: message.body,
            created_at: Utc::now(),
            deleted_at: None,
        };
        inner.next_id += 1;
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn list_since(
        &self,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.id > cursor && m.deleted_at.is_none())
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn room_history(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let inner = self.inner.lock().unwrap();
        let mut matching: Vec<StoredMessage> = inner
            .messages
            .iter()
            .filter(|m| m.room_id == room_id && m.deleted_at.is_none())
            .cloned()
            .collect();
        // Newest `limit` messages, oldest first
        let skip = matching.len().saturating_sub(limit as usize);
        Ok(matching.split_off(skip))
    }

    async fn count_since(&self, cursor: MessageId) -> Result<u64, ChatError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .messages
            .iter()
            .filter(|m| m.id > cursor && m.deleted_at.is_none())
            .count() as u64)
    }

    async fn mark_deleted(&self, id: MessageId, sender_id: UserId) -> Result<bool, ChatError> {
        let mut inner = self.inner.lock().unwrap();
        let target = inner
            .messages
            .iter_mut()
            .find(|m| m.id == id && m.sender_id == sender_id && m.deleted_at.is_none());
        match target {
            Some(message) => {
                message.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_cursor(&self, sync_name: &str) -> Result<MessageId, ChatError> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .cursors
            .get(sync_name)
            .copied()
            .map_or(MessageId::ZERO, MessageId))
    }

    async fn save_cursor(&self, sync_name: &str, cursor: MessageId) -> Result<(), ChatError> {
        let mut inner = self.inner.lock().unwrap();
        inner.cursors.insert(sync_name.to_string(), cursor.0);
        Ok(())
    }
}
