use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use super::message::Message;

/// SSE event name for presence snapshots.
pub const PRESENCE_EVENT: &str = "presence";
/// SSE event name for message deliveries.
pub const MESSAGE_EVENT: &str = "message";

/// Full-replacement snapshot of the currently connected user ids.
///
/// Clients must replace their online set with each snapshot; snapshots are
/// never deltas, and a slow client may skip intermediate states.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct PresenceSnapshot {
    /// Every user with a live connection, the receiver included.
    pub user_ids: Vec<Uuid>,
}

/// A server-to-client event pushed over the realtime channel.
///
/// The variant determines the SSE event name; the payload is the event data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// The online-user set changed.
    Presence(PresenceSnapshot),
    /// A message addressed to the receiving user was persisted.
    Delivery(Message),
}

/// Failure to interpret an incoming `(event, data)` pair.
#[derive(Debug, Error)]
pub enum EventParseError {
    #[error("unknown event type: {0}")]
    UnknownEvent(String),
    #[error("malformed event payload: {0}")]
    Payload(#[from] serde_json::Error),
}

impl StreamEvent {
    /// The SSE event name for this event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Presence(_) => PRESENCE_EVENT,
            Self::Delivery(_) => MESSAGE_EVENT,
        }
    }

    /// Serializes the event payload to the JSON carried in the data field.
    ///
    /// # Errors
    /// Returns an error if the payload cannot be serialized.
    pub fn to_data(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Presence(snapshot) => serde_json::to_string(snapshot),
            Self::Delivery(message) => serde_json::to_string(message),
        }
    }

    /// Reconstructs an event from an SSE `(event, data)` pair.
    ///
    /// # Errors
    /// Returns an error for unknown event names or undecodable payloads.
    pub fn parse(name: &str, data: &str) -> Result<Self, EventParseError> {
        match name {
            PRESENCE_EVENT => Ok(Self::Presence(serde_json::from_str(data)?)),
            MESSAGE_EVENT => Ok(Self::Delivery(serde_json::from_str(data)?)),
            other => Err(EventParseError::UnknownEvent(other.to_string())),
        }
    }
}
