use metrics::counter;
use shared::models::{PresenceSnapshot, StreamEvent};
use tracing::debug;
use uuid::Uuid;

use super::registry::ConnectionHandle;

/// Fans the current online-user set out to every live connection.
///
/// Broadcasts are fire-and-forget: no acknowledgment is awaited, and a
/// connection whose buffer is full simply misses this snapshot. Each
/// snapshot is a full replacement of the previous one, so a newer snapshot
/// always supersedes whatever a slow client last saw.
#[derive(Debug, Default)]
pub struct PresenceBroadcaster;

impl PresenceBroadcaster {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Sends `online` to every handle in `targets`, the handles of users in
    /// the set included.
    pub fn announce(&self, targets: &[ConnectionHandle], online: Vec<Uuid>) {
        counter!("courier_presence_broadcasts_total").increment(1);

        let event = StreamEvent::Presence(PresenceSnapshot { user_ids: online });
        for handle in targets {
            if handle.try_send(event.clone()).is_err() {
                counter!("courier_presence_drops_total").increment(1);
                debug!(
                    connection_id = handle.connection_id(),
                    "presence snapshot dropped for saturated or closed connection"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::realtime::registry::ConnectionRegistry;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn full_channel_does_not_block_announce() {
        let registry = ConnectionRegistry::new(PresenceBroadcaster::new());
        let user = Uuid::new_v4();
        let (tx, mut rx) = mpsc::channel(1);

        // The register announcement fills the 1-slot buffer.
        registry.register(user, tx);

        // A second announcement must drop rather than block.
        let other = Uuid::new_v4();
        let (other_tx, _other_rx) = mpsc::channel(1);
        registry.register(other, other_tx);

        // Only the first snapshot is buffered.
        let first = rx.recv().await.unwrap();
        match first {
            StreamEvent::Presence(snapshot) => assert_eq!(snapshot.user_ids, vec![user]),
            other => panic!("expected presence snapshot, got {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }
}
