//! Outbound message orchestration.
//!
//! The service validates a send request, persists it through the store
//! collaborator, and only then hands the canonical record to the router.
//! Routing outcome never affects the caller: a persisted-but-undelivered
//! message is a normal state recovered through history fetch.

use std::sync::Arc;

use metrics::counter;
use shared::config::server::MediaConfig;
use shared::models::{MediaKind, MediaPayload, Message, SendMessageRequest};
use thiserror::Error;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::realtime::{MessageRouter, RoutingOutcome};

use super::message_store::{MessageStore, NewMessage, StoreError};

/// Errors a send call can surface to the caller.
#[derive(Debug, Error)]
pub enum SendMessageError {
    /// The request was rejected before any side effect.
    #[error("validation error: {0}")]
    Validation(String),
    /// The media payload exceeds a configured ceiling. Rejected before any
    /// side effect.
    #[error("media payload of {actual} bytes exceeds the {limit} byte ceiling")]
    PayloadTooLarge { limit: usize, actual: usize },
    /// Persistence failed; nothing was stored and nothing was routed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Validates, persists, and routes outbound messages.
#[derive(Clone)]
pub struct MessageService {
    store: Arc<dyn MessageStore>,
    router: Arc<MessageRouter>,
    media: MediaConfig,
}

impl std::fmt::Debug for MessageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageService").finish()
    }
}

impl MessageService {
    #[must_use]
    pub fn new(store: Arc<dyn MessageStore>, router: Arc<MessageRouter>, media: MediaConfig) -> Self {
        Self {
            store,
            router,
            media,
        }
    }

    /// Sends a message from `sender_id` to `recipient_id`.
    ///
    /// Exactly one store insert happens on success, followed by zero or one
    /// realtime push. The canonical record is returned regardless of the
    /// routing outcome.
    ///
    /// # Errors
    /// Returns a validation or size error before any side effect, or a
    /// store error if persistence fails (in which case nothing is routed).
    #[instrument(name = "messages.send", skip(self, request), err)]
    pub async fn send(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<Message, SendMessageError> {
        let draft = self.validate(sender_id, recipient_id, request)?;

        // Routing must only ever see durable messages, so the insert is
        // awaited before the push is attempted.
        let message = self.store.insert(draft).await?;

        match self.router.route(&message) {
            RoutingOutcome::Delivered => {}
            RoutingOutcome::RecipientOffline => {
                counter!("courier_sends_undelivered_total").increment(1);
                debug!(
                    message_id = %message.id,
                    recipient_id = %message.recipient_id,
                    "recipient not reachable; message awaits history fetch"
                );
            }
        }

        Ok(message)
    }

    /// The ordered conversation history between `user_id` and `peer_id`.
    ///
    /// # Errors
    /// Returns an error if the store query fails.
    #[instrument(name = "messages.history", skip(self), err)]
    pub async fn history(
        &self,
        user_id: Uuid,
        peer_id: Uuid,
    ) -> Result<Vec<Message>, SendMessageError> {
        Ok(self.store.history_between(user_id, peer_id).await?)
    }

    fn validate(
        &self,
        sender_id: Uuid,
        recipient_id: Uuid,
        request: SendMessageRequest,
    ) -> Result<NewMessage, SendMessageError> {
        let text = request
            .text
            .map(|text| text.trim().to_string())
            .filter(|text| !text.is_empty());

        let media = match (request.image, request.video) {
            (Some(_), Some(_)) => {
                return Err(SendMessageError::Validation(
                    "a message carries either an image or a video, not both".to_string(),
                ));
            }
            (Some(image), None) => Some(MediaPayload::image(image)),
            (None, Some(video)) => Some(MediaPayload::video(video)),
            (None, None) => None,
        };

        if text.is_none() && media.is_none() {
            return Err(SendMessageError::Validation(
                "message text and media cannot both be empty".to_string(),
            ));
        }

        if let Some(media) = &media {
            self.check_ceilings(media)?;
        }

        Ok(NewMessage {
            sender_id,
            recipient_id,
            text,
            media,
        })
    }

    fn check_ceilings(&self, media: &MediaPayload) -> Result<(), SendMessageError> {
        let encoded = media.encoded_len();
        if encoded > self.media.max_encoded_bytes {
            return Err(SendMessageError::PayloadTooLarge {
                limit: self.media.max_encoded_bytes,
                actual: encoded,
            });
        }

        let decoded = decoded_estimate(&media.data);
        let limit = match media.kind {
            MediaKind::Image => self.media.max_image_bytes,
            MediaKind::Video => self.media.max_video_bytes,
        };
        if decoded > limit {
            return Err(SendMessageError::PayloadTooLarge {
                limit,
                actual: decoded,
            });
        }

        Ok(())
    }
}

/// Decoded size of a base64 data URL, estimated from the encoded length
/// without decoding the payload.
fn decoded_estimate(data: &str) -> usize {
    let encoded = data.rsplit(',').next().unwrap_or(data);
    encoded.len() / 4 * 3
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::{ConnectionRegistry, PresenceBroadcaster};
    use crate::services::message_store::MemoryMessageStore;
    use async_trait::async_trait;
    use shared::models::StreamEvent;
    use tokio::sync::mpsc;

    struct UnavailableStore;

    #[async_trait]
    impl MessageStore for UnavailableStore {
        async fn insert(&self, _draft: NewMessage) -> Result<Message, StoreError> {
            Err(StoreError::Unavailable("maintenance".to_string()))
        }

        async fn history_between(
            &self,
            _user_id: Uuid,
            _peer_id: Uuid,
        ) -> Result<Vec<Message>, StoreError> {
            Err(StoreError::Unavailable("maintenance".to_string()))
        }
    }

    fn harness() -> (Arc<ConnectionRegistry>, MessageService) {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = Arc::new(MessageRouter::new(registry.clone()));
        let service = MessageService::new(
            Arc::new(MemoryMessageStore::new()),
            router,
            MediaConfig::default(),
        );
        (registry, service)
    }

    #[tokio::test]
    async fn rejects_empty_message() {
        let (_registry, service) = harness();
        let result = service
            .send(Uuid::new_v4(), Uuid::new_v4(), SendMessageRequest::default())
            .await;
        assert!(matches!(result, Err(SendMessageError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_whitespace_only_text() {
        let (_registry, service) = harness();
        let result = service
            .send(
                Uuid::new_v4(),
                Uuid::new_v4(),
                SendMessageRequest::text("   "),
            )
            .await;
        assert!(matches!(result, Err(SendMessageError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_image_and_video_together() {
        let (_registry, service) = harness();
        let request = SendMessageRequest {
            image: Some("data:image/png;base64,aGk=".to_string()),
            video: Some("data:video/mp4;base64,aGk=".to_string()),
            ..SendMessageRequest::default()
        };
        let result = service.send(Uuid::new_v4(), Uuid::new_v4(), request).await;
        assert!(matches!(result, Err(SendMessageError::Validation(_))));
    }

    #[tokio::test]
    async fn rejects_oversized_media() {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = Arc::new(MessageRouter::new(registry));
        let service = MessageService::new(
            Arc::new(MemoryMessageStore::new()),
            router,
            MediaConfig {
                max_image_bytes: 16,
                max_video_bytes: 16,
                max_encoded_bytes: 1024,
            },
        );

        let request = SendMessageRequest {
            image: Some(format!("data:image/png;base64,{}", "A".repeat(64))),
            ..SendMessageRequest::default()
        };
        let result = service.send(Uuid::new_v4(), Uuid::new_v4(), request).await;
        assert!(matches!(
            result,
            Err(SendMessageError::PayloadTooLarge { limit: 16, .. })
        ));
    }

    #[tokio::test]
    async fn send_persists_then_routes_canonical_record() {
        let (registry, service) = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let (tx, mut rx) = mpsc::channel(8);
        registry.register(bob, tx);
        let _ = rx.recv().await; // presence announcement

        let message = service
            .send(alice, bob, SendMessageRequest::text("hi"))
            .await
            .unwrap();

        match rx.recv().await.unwrap() {
            StreamEvent::Delivery(delivered) => {
                // The routed event carries the persisted record, id included.
                assert_eq!(delivered, message);
            }
            other => panic!("expected delivery, got {other:?}"),
        }

        let history = service.history(bob, alice).await.unwrap();
        assert_eq!(history, vec![message]);
    }

    #[tokio::test]
    async fn offline_recipient_still_gets_a_persisted_record() {
        let (_registry, service) = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let message = service
            .send(alice, bob, SendMessageRequest::text("hi"))
            .await
            .unwrap();
        assert!(!message.id.is_nil());

        let history = service.history(bob, alice).await.unwrap();
        assert_eq!(history.len(), 1);
    }

    #[tokio::test]
    async fn store_failure_aborts_before_routing() {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = Arc::new(MessageRouter::new(registry.clone()));
        let service =
            MessageService::new(Arc::new(UnavailableStore), router, MediaConfig::default());

        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(bob, tx);
        let _ = rx.recv().await; // presence announcement

        let result = service.send(alice, bob, SendMessageRequest::text("hi")).await;
        assert!(matches!(
            result,
            Err(SendMessageError::Store(StoreError::Unavailable(_)))
        ));

        // No delivery event may reach the recipient for an unpersisted send.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn round_trips_text_and_media_fields() {
        let (_registry, service) = harness();
        let (alice, bob) = (Uuid::new_v4(), Uuid::new_v4());

        let request = SendMessageRequest {
            text: Some("look at this".to_string()),
            video: Some("data:video/mp4;base64,bW92aWU=".to_string()),
            ..SendMessageRequest::default()
        };
        let sent = service.send(alice, bob, request).await.unwrap();

        let history = service.history(alice, bob).await.unwrap();
        assert_eq!(history[0].text, sent.text);
        assert_eq!(history[0].media, sent.media);
        assert_eq!(
            history[0].media.as_ref().unwrap().data,
            "data:video/mp4;base64,bW92aWU="
        );
    }

    #[test]
    fn decoded_estimate_strips_the_data_url_header() {
        // 8 base64 chars decode to 6 bytes.
        assert_eq!(decoded_estimate("data:image/png;base64,AAAAAAAA"), 6);
        assert_eq!(decoded_estimate("AAAAAAAA"), 6);
    }
}
