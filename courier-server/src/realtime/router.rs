use std::sync::Arc;

use metrics::counter;
use shared::models::{Message, StreamEvent};
use tracing::debug;

use super::registry::ConnectionRegistry;

/// Outcome of routing one persisted message.
///
/// Neither variant is an error: an offline recipient sees the message on
/// the next history fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingOutcome {
    /// The delivery event was handed to the recipient's live connection.
    Delivered,
    /// The recipient had no usable connection; nothing was sent.
    RecipientOffline,
}

/// Pushes persisted messages to their recipient's live connection.
///
/// Delivery is at-most-once per connection generation: the router never
/// retries, never queues for offline recipients, and never blocks the
/// caller. A connection whose buffer is full or whose receiver is gone is
/// treated the same as an offline recipient.
#[derive(Debug)]
pub struct MessageRouter {
    registry: Arc<ConnectionRegistry>,
}

impl MessageRouter {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Routes `message` to its recipient. Must only be called with already
    /// persisted messages, so the recipient can always recover the record
    /// from history.
    pub fn route(&self, message: &Message) -> RoutingOutcome {
        let Some(handle) = self.registry.lookup(message.recipient_id) else {
            counter!("courier_message_routes_total", "outcome" => "recipient_offline")
                .increment(1);
            return RoutingOutcome::RecipientOffline;
        };

        match handle.try_send(StreamEvent::Delivery(message.clone())) {
            Ok(()) => {
                counter!("courier_message_routes_total", "outcome" => "delivered").increment(1);
                RoutingOutcome::Delivered
            }
            Err(_) => {
                counter!("courier_message_routes_total", "outcome" => "channel_unavailable")
                    .increment(1);
                debug!(
                    message_id = %message.id,
                    recipient_id = %message.recipient_id,
                    "recipient connection unusable; message remains in history"
                );
                RoutingOutcome::RecipientOffline
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::presence::PresenceBroadcaster;
    use shared::models::Timestamp;
    use tokio::sync::mpsc;
    use uuid::Uuid;

    fn message_to(recipient_id: Uuid) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id: Uuid::new_v4(),
            recipient_id,
            text: Some("hi".to_string()),
            media: None,
            created_at: Timestamp::now(),
        }
    }

    #[tokio::test]
    async fn routes_to_online_recipient_exactly_once() {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = MessageRouter::new(registry.clone());

        let recipient = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(8);
        registry.register(recipient, tx);
        let _ = rx.recv().await; // drain the presence announcement

        let message = message_to(recipient);
        assert_eq!(router.route(&message), RoutingOutcome::Delivered);

        match rx.recv().await.unwrap() {
            StreamEvent::Delivery(delivered) => assert_eq!(delivered, message),
            other => panic!("expected delivery, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn offline_recipient_gets_nothing() {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = MessageRouter::new(registry);

        let message = message_to(Uuid::new_v4());
        assert_eq!(router.route(&message), RoutingOutcome::RecipientOffline);
    }

    #[tokio::test]
    async fn closed_connection_counts_as_offline() {
        let registry = Arc::new(ConnectionRegistry::new(PresenceBroadcaster::new()));
        let router = MessageRouter::new(registry.clone());

        let recipient = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(8);
        registry.register(recipient, tx);
        drop(rx);

        let message = message_to(recipient);
        assert_eq!(router.route(&message), RoutingOutcome::RecipientOffline);
    }
}
