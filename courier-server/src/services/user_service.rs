//! Roster lookups.
//!
//! Account management is owned by an external service; this module only
//! reads the directory to build the contact roster, always excluding the
//! requesting user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use shared::models::{Timestamp, User};
use sqlx::PgPool;
use uuid::Uuid;

use super::message_store::StoreError;

/// Read-only view of the user directory.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Every known user except `exclude`, ordered by display name.
    async fn roster(&self, exclude: Uuid) -> Result<Vec<User>, StoreError>;
}

/// Postgres-backed directory.
#[derive(Debug, Clone)]
pub struct PgUserDirectory {
    pool: PgPool,
}

impl PgUserDirectory {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    full_name: String,
    email: String,
    avatar: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            full_name: row.full_name,
            email: row.email,
            avatar: row.avatar,
            created_at: Timestamp(row.created_at),
        }
    }
}

#[async_trait]
impl UserDirectory for PgUserDirectory {
    async fn roster(&self, exclude: Uuid) -> Result<Vec<User>, StoreError> {
        let rows = sqlx::query_as::<_, UserRow>(
            "SELECT id, full_name, email, avatar, created_at
             FROM users
             WHERE id <> $1
             ORDER BY full_name, id",
        )
        .bind(exclude)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(User::from).collect())
    }
}

/// Fixed in-memory directory for database-less mode and tests.
#[derive(Debug, Clone, Default)]
pub struct MemoryUserDirectory {
    users: Vec<User>,
}

impl MemoryUserDirectory {
    #[must_use]
    pub fn new(mut users: Vec<User>) -> Self {
        users.sort_by(|a, b| a.full_name.cmp(&b.full_name).then(a.id.cmp(&b.id)));
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn roster(&self, exclude: Uuid) -> Result<Vec<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .filter(|user| user.id != exclude)
            .cloned()
            .collect())
    }
}
