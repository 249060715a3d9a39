pub mod errors;
pub mod events;
pub mod message;
pub mod timestamp;
pub mod user;

pub use errors::ErrorResponse;
pub use events::{PresenceSnapshot, StreamEvent, MESSAGE_EVENT, PRESENCE_EVENT};
pub use message::{MediaKind, MediaPayload, Message, SendMessageRequest};
pub use timestamp::Timestamp;
pub use user::User;
