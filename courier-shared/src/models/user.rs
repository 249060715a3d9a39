use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// Represents a user account as exposed over the API.
///
/// Online status is never part of this record; it is derived from the
/// connection registry and delivered through presence snapshots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct User {
    /// Unique identifier for the user. Immutable after signup.
    pub id: Uuid,

    /// Display name shown in the roster.
    pub full_name: String,

    /// The user's email address.
    pub email: String,

    /// Optional reference to the user's avatar image.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,

    /// When the account was created.
    pub created_at: Timestamp,
}
