//! Postgres-backed message store.
//!
//! # Security
//!
//! - All queries use parameterized statements (SQL injection safe)
//! - Message bodies are never logged
//! - Soft deletes via `deleted_at` timestamp; rows are never hard-deleted
//!   so the synchronizer cursor stays valid

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MessageId, RoomId, UserId};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use crate::errors::ChatError;
use crate::store::{MessageKind, MessageStore, NewMessage, StoredMessage};

/// Maximum connections in the store pool.
const POOL_MAX_CONNECTIONS: u32 = 16;

/// Postgres-backed [`MessageStore`] implementation.
#[derive(Debug, Clone)]
pub struct PostgresMessageStore {
    pool: PgPool,
}

impl PostgresMessageStore {
    /// Connect to Postgres and ensure the schema exists.
    pub async fn connect(database_url: &str) -> Result<Self, ChatError> {
        let pool = PgPoolOptions::new()
            .max_connections(POOL_MAX_CONNECTIONS)
            .connect(database_url)
            .await
            .map_err(store_err)?;

        let store = Self { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wrap an existing pool (for tests against a shared database).
    #[must_use]
    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the messages and sync cursor tables if they do not exist.
    #[instrument(skip_all)]
    async fn ensure_schema(&self) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                id BIGSERIAL PRIMARY KEY,
                room_id UUID NOT NULL,
                sender_id UUID NOT NULL,
                kind TEXT NOT NULL DEFAULT 'text',
                body TEXT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                deleted_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_messages_room_id ON messages (room_id, id)
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sync_cursors (
                sync_name TEXT PRIMARY KEY,
                position BIGINT NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}

#[async_trait]
impl MessageStore for PostgresMessageStore {
    #[instrument(skip_all, fields(room_id = %message.room_id, sender_id = %message.sender_id))]
    async fn append(&self, message: NewMessage) -> Result<StoredMessage, ChatError> {
        let row: MessageRow = sqlx::query_as(
            r#"
            INSERT INTO messages (room_id, sender_id, kind, body)
            VALUES ($1, $2, $3, $4)
            RETURNING id, room_id, sender_id, kind, body, created_at, deleted_at
            "#,
        )
        .bind(message.room_id.0)
        .bind(message.sender_id.0)
        .bind(message.kind.as_str())
        .bind(&message.body)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        row.try_into()
    }

    #[instrument(skip_all, fields(cursor = %cursor, limit = limit))]
    async fn list_since(
        &self,
        cursor: MessageId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        let rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, sender_id, kind, body, created_at, deleted_at
            FROM messages
            WHERE id > $1
              AND deleted_at IS NULL
            ORDER BY id ASC
            LIMIT $2
            "#,
        )
        .bind(cursor.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip_all, fields(room_id = %room_id, limit = limit))]
    async fn room_history(
        &self,
        room_id: RoomId,
        limit: u32,
    ) -> Result<Vec<StoredMessage>, ChatError> {
        // Fetch the newest N, then reverse so callers see oldest-first
        let mut rows: Vec<MessageRow> = sqlx::query_as(
            r#"
            SELECT id, room_id, sender_id, kind, body, created_at, deleted_at
            FROM messages
            WHERE room_id = $1
              AND deleted_at IS NULL
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(room_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(store_err)?;

        rows.reverse();
        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip_all, fields(cursor = %cursor))]
    async fn count_since(&self, cursor: MessageId) -> Result<u64, ChatError> {
        let row: CountRow = sqlx::query_as(
            r#"
            SELECT COUNT(*) AS count
            FROM messages
            WHERE id > $1
              AND deleted_at IS NULL
            "#,
        )
        .bind(cursor.0)
        .fetch_one(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(u64::try_from(row.count).unwrap_or(0))
    }

    #[instrument(skip_all, fields(message_id = %id, sender_id = %sender_id))]
    async fn mark_deleted(&self, id: MessageId, sender_id: UserId) -> Result<bool, ChatError> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET deleted_at = NOW()
            WHERE id = $1
              AND sender_id = $2
              AND deleted_at IS NULL
            "#,
        )
        .bind(id.0)
        .bind(sender_id.0)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip_all, fields(sync_name = %sync_name))]
    async fn load_cursor(&self, sync_name: &str) -> Result<MessageId, ChatError> {
        let row: Option<CursorRow> = sqlx::query_as(
            r#"
            SELECT position
            FROM sync_cursors
            WHERE sync_name = $1
            "#,
        )
        .bind(sync_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(row.map_or(MessageId::ZERO, |r| MessageId(r.position)))
    }

    #[instrument(skip_all, fields(sync_name = %sync_name, cursor = %cursor))]
    async fn save_cursor(&self, sync_name: &str, cursor: MessageId) -> Result<(), ChatError> {
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (sync_name, position)
            VALUES ($1, $2)
            ON CONFLICT (sync_name) DO UPDATE
            SET position = EXCLUDED.position,
                updated_at = NOW()
            "#,
        )
        .bind(sync_name)
        .bind(cursor.0)
        .execute(&self.pool)
        .await
        .map_err(store_err)?;

        Ok(())
    }
}

/// Map an sqlx error to the sender-visible store error.
fn store_err(e: sqlx::Error) -> ChatError {
    ChatError::StoreUnavailable(e.to_string())
}

// ============================================================================
// Database Row Types
// ============================================================================

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: i64,
    room_id: Uuid,
    sender_id: Uuid,
    kind: String,
    body: String,
    created_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl TryFrom<MessageRow> for StoredMessage {
    type Error = ChatError;

    fn try_from(row: MessageRow) -> Result<Self, ChatError> {
        Ok(StoredMessage {
            id: MessageId(row.id),
            room_id: RoomId(row.room_id),
            sender_id: UserId(row.sender_id),
            kind: MessageKind::parse(&row.kind)?,
            body: row.body,
            created_at: row.created_at,
            deleted_at: row.deleted_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct CountRow {
    count: i64,
}

#[derive(sqlx::FromRow)]
struct CursorRow {
    position: i64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_message_row_conversion() {
        let room = Uuid::new_v4();
        let sender = Uuid::new_v4();
        let now = Utc::now();

        let row = MessageRow {
            id: 42,
            room_id: room,
            sender_id: sender,
            kind: "system".to_string(),
            body: "hello".to_string(),
            created_at: now,
            deleted_at: None,
        };

        let stored: StoredMessage = row.try_into().unwrap();
        assert_eq!(stored.id, MessageId(42));
        assert_eq!(stored.room_id, RoomId(room));
        assert_eq!(stored.sender_id, UserId(sender));
        assert_eq!(stored.kind, MessageKind::System);
        assert_eq!(stored.body, "hello");
        assert_eq!(stored.created_at, now);
        assert!(stored.deleted_at.is_none());
    }

    #[test]
    fn test_message_row_unknown_kind_rejected() {
        let row = MessageRow {
            id: 1,
            room_id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            kind: "hologram".to_string(),
            body: "hello".to_string(),
            created_at: Utc::now(),
            deleted_at: None,
        };

        let result: Result<StoredMessage, ChatError> = row.try_into();
        assert!(result.is_err());
    }

    #[test]
    fn test_store_err_is_sender_visible() {
        let err = store_err(sqlx::Error::PoolTimedOut);
        assert!(err.is_sender_visible());
        assert_eq!(err.error_code(), 1);
    }
}
