//! The opaque message store collaborators.
//!
//! The delivery subsystem treats persistence as a black box: it inserts a
//! draft and gets back the canonical record, or queries the ordered history
//! of a user pair. The Postgres implementation is the production store; the
//! in-memory implementation backs database-less development and tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{MediaKind, MediaPayload, Message, Timestamp};
use sqlx::PgPool;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Errors surfaced by a message store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot currently accept work. Nothing was persisted, so
    /// resubmitting the same message is safe.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// The underlying database rejected the operation.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// A message that has passed validation but has no identity yet.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub sender_id: Uuid,
    pub recipient_id: Uuid,
    pub text: Option<String>,
    pub media: Option<MediaPayload>,
}

/// Insert-and-query surface the delivery core depends on.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persists `draft` and returns the canonical record with its assigned
    /// id and timestamp.
    async fn insert(&self, draft: NewMessage) -> Result<Message, StoreError>;

    /// Every message exchanged between the two users, in persistence order.
    async fn history_between(&self, user_id: Uuid, peer_id: Uuid)
        -> Result<Vec<Message>, StoreError>;
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    sender_id: Uuid,
    recipient_id: Uuid,
    text: Option<String>,
    media_kind: Option<String>,
    media_data: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        let media = match (row.media_kind.as_deref(), row.media_data) {
            (Some(kind), Some(data)) => MediaKind::try_from(kind)
                .ok()
                .map(|kind| MediaPayload { kind, data }),
            _ => None,
        };

        Self {
            id: row.id,
            sender_id: row.sender_id,
            recipient_id: row.recipient_id,
            text: row.text,
            media,
            created_at: Timestamp(row.created_at),
        }
    }
}

/// Postgres-backed message store.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn insert(&self, draft: NewMessage) -> Result<Message, StoreError> {
        let (media_kind, media_data) = match draft.media {
            Some(media) => (Some(media.kind.as_str().to_string()), Some(media.data)),
            None => (None, None),
        };

        let row = sqlx::query_as::<_, MessageRow>(
            "INSERT INTO messages (sender_id, recipient_id, text, media_kind, media_data)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING id, sender_id, recipient_id, text, media_kind, media_data, created_at",
        )
        .bind(draft.sender_id)
        .bind(draft.recipient_id)
        .bind(draft.text)
        .bind(media_kind)
        .bind(media_data)
        .fetch_one(&self.pool)
        .await
        .map_err(map_pool_error)?;

        Ok(row.into())
    }

    async fn history_between(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Vec<Message>, StoreError> {
        let rows = sqlx::query_as::<_, MessageRow>(
            "SELECT id, sender_id, recipient_id, text, media_kind, media_data, created_at
             FROM messages
             WHERE (sender_id = $1 AND recipient_id = $2)
                OR (sender_id = $2 AND recipient_id = $1)
             ORDER BY created_at, id",
        )
        .bind(user_id)
        .bind(peer_id)
        .fetch_all(&self.pool)
        .await
        .map_err(map_pool_error)?;

        Ok(rows.into_iter().map(Message::from).collect())
    }
}

fn map_pool_error(err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            StoreError::Unavailable(err.to_string())
        }
        other => StoreError::Database(other),
    }
}

/// In-memory message store for database-less mode and tests.
///
/// Assigns ids and timestamps at insert time and keeps insertion order, so
/// it honors the same ordering contract as the Postgres store.
#[derive(Debug, Default)]
pub struct MemoryMessageStore {
    messages: Mutex<Vec<Message>>,
}

impl MemoryMessageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn insert(&self, draft: NewMessage) -> Result<Message, StoreError> {
        let message = Message {
            id: Uuid::new_v4(),
            sender_id: draft.sender_id,
            recipient_id: draft.recipient_id,
            text: draft.text,
            media: draft.media,
            created_at: Timestamp(Utc::now()),
        };

        let mut messages = self.messages.lock().await;
        messages.push(message.clone());
        Ok(message)
    }

    async fn history_between(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Vec<Message>, StoreError> {
        let messages = self.messages.lock().await;
        Ok(messages
            .iter()
            .filter(|message| message.involves_pair(user_id, peer_id))
            .cloned()
            .collect())
    }
}
