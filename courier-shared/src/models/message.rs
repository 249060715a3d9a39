use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// The kind of inline media attached to a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    /// An inline-encoded image.
    Image,
    /// An inline-encoded video.
    Video,
}

impl MediaKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
        }
    }
}

impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MediaKind {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "image" => Ok(Self::Image),
            "video" => Ok(Self::Video),
            _ => Err("invalid media kind"),
        }
    }
}

/// A single inline media attachment: exactly one image or one video,
/// carried as a base64 data URL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MediaPayload {
    /// Whether the payload is an image or a video.
    pub kind: MediaKind,
    /// The encoded payload (data URL).
    pub data: String,
}

impl MediaPayload {
    #[must_use]
    pub fn image(data: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Image,
            data: data.into(),
        }
    }

    #[must_use]
    pub fn video(data: impl Into<String>) -> Self {
        Self {
            kind: MediaKind::Video,
            data: data.into(),
        }
    }

    /// Length of the encoded payload in bytes.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        self.data.len()
    }
}

/// A persisted direct message between two users.
///
/// Immutable once persisted; `id` is assigned by the store and doubles as
/// the client-side de-duplication and ordering key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Unique identifier, assigned at persistence time.
    pub id: Uuid,

    /// ID of the user who sent the message.
    pub sender_id: Uuid,

    /// ID of the user the message is addressed to.
    pub recipient_id: Uuid,

    /// Text body. At least one of `text` and `media` is present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Inline media attachment, when present.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<MediaPayload>,

    /// Timestamp assigned when the message was persisted.
    pub created_at: Timestamp,
}

impl Message {
    /// Whether this message belongs to the conversation between `a` and `b`.
    #[must_use]
    pub fn involves_pair(&self, a: Uuid, b: Uuid) -> bool {
        (self.sender_id == a && self.recipient_id == b)
            || (self.sender_id == b && self.recipient_id == a)
    }
}

/// Request body for `POST /api/messages/send/{peer_id}`.
///
/// Media fields carry base64 data URLs; at most one of `image`/`video` may
/// be set, and an entirely empty request is rejected before any side effect.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    /// Optional text body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,

    /// Optional inline-encoded image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,

    /// Optional inline-encoded video.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video: Option<String>,
}

impl SendMessageRequest {
    #[must_use]
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            text: Some(body.into()),
            ..Self::default()
        }
    }
}
