pub mod message_service;
pub mod message_store;
pub mod user_service;

pub use message_service::{MessageService, SendMessageError};
pub use message_store::{MemoryMessageStore, MessageStore, NewMessage, PgMessageStore, StoreError};
pub use user_service::{MemoryUserDirectory, PgUserDirectory, UserDirectory};
