//! Local conversation state and the connection lifecycle.
//!
//! The sync agent is a pure state machine: the command loop feeds it
//! connection transitions, fetched history, and stream events, and reads
//! back the conversation view. Keeping it free of I/O makes the merge and
//! subscription rules directly testable.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use shared::models::{Message, StreamEvent};
use uuid::Uuid;

/// Lifecycle of the realtime connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

#[derive(Debug)]
struct Selection {
    peer: Uuid,
    subscription_id: u64,
    messages: Vec<Message>,
}

#[derive(Debug)]
struct Inner {
    state: ConnectionState,
    online: BTreeSet<Uuid>,
    selection: Option<Selection>,
    next_subscription_id: u64,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            online: BTreeSet::new(),
            selection: None,
            next_subscription_id: 1,
        }
    }
}

/// Client-side agent reconciling realtime events with fetched history.
///
/// Presence snapshots replace the online set wholesale. Delivery events
/// append to the conversation only while their sender is the selected
/// peer; everything else is dropped from the visible view. Messages are
/// de-duplicated by id, so replaying history over live pushes is safe.
#[derive(Debug, Clone, Default)]
pub struct SyncAgent {
    inner: Arc<Mutex<Inner>>,
}

/// Active delivery subscription for one selected peer.
///
/// Dropping the guard unsubscribes. Selecting another peer supersedes the
/// guard immediately; dropping a superseded guard is a no-op, so switching
/// peers repeatedly can never stack handlers.
#[derive(Debug)]
pub struct DeliverySubscription {
    inner: Weak<Mutex<Inner>>,
    id: u64,
}

impl Drop for DeliverySubscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            let mut inner = lock(&inner);
            let live = inner
                .selection
                .as_ref()
                .is_some_and(|selection| selection.subscription_id == self.id);
            if live {
                inner.selection = None;
            }
        }
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SyncAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.inner).state
    }

    /// A connection attempt is starting.
    pub fn begin_connect(&self) {
        let mut inner = lock(&self.inner);
        inner.state = match inner.state {
            ConnectionState::Disconnected | ConnectionState::Connecting => {
                ConnectionState::Connecting
            }
            ConnectionState::Connected | ConnectionState::Reconnecting => {
                ConnectionState::Reconnecting
            }
        };
    }

    /// The stream is established. Returns whether the current conversation
    /// must be re-fetched: deliveries are never queued while disconnected,
    /// so any existing selection needs a history resync.
    pub fn mark_connected(&self) -> bool {
        let mut inner = lock(&self.inner);
        inner.state = ConnectionState::Connected;
        inner.selection.is_some()
    }

    /// The stream dropped mid-session; the agent will try again.
    pub fn connection_lost(&self) {
        let mut inner = lock(&self.inner);
        if inner.state != ConnectionState::Disconnected {
            inner.state = ConnectionState::Reconnecting;
        }
        // Nobody is observably online without a live stream.
        inner.online.clear();
    }

    /// Deliberate teardown, tied to auth state.
    pub fn disconnect(&self) {
        let mut inner = lock(&self.inner);
        inner.state = ConnectionState::Disconnected;
        inner.online.clear();
    }

    /// Selects `peer`, replacing local conversation state with `history`
    /// and superseding any previous subscription.
    #[must_use]
    pub fn subscribe(&self, peer: Uuid, history: Vec<Message>) -> DeliverySubscription {
        let mut inner = lock(&self.inner);
        let id = inner.next_subscription_id;
        inner.next_subscription_id += 1;
        inner.selection = Some(Selection {
            peer,
            subscription_id: id,
            messages: dedupe_by_id(history),
        });
        DeliverySubscription {
            inner: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// Replaces the conversation with freshly fetched history, keeping the
    /// current subscription.
    pub fn replace_history(&self, history: Vec<Message>) {
        let mut inner = lock(&self.inner);
        if let Some(selection) = inner.selection.as_mut() {
            selection.messages = dedupe_by_id(history);
        }
    }

    /// Feeds one inbound stream event into local state.
    pub fn handle_event(&self, event: StreamEvent) {
        let mut inner = lock(&self.inner);
        match event {
            StreamEvent::Presence(snapshot) => {
                inner.online = snapshot.user_ids.into_iter().collect();
            }
            StreamEvent::Delivery(message) => {
                let Some(selection) = inner.selection.as_mut() else {
                    return;
                };
                if message.sender_id != selection.peer {
                    return;
                }
                if selection
                    .messages
                    .iter()
                    .any(|existing| existing.id == message.id)
                {
                    return;
                }
                selection.messages.push(message);
            }
        }
    }

    /// The visible conversation with the selected peer.
    #[must_use]
    pub fn conversation(&self) -> Vec<Message> {
        lock(&self.inner)
            .selection
            .as_ref()
            .map(|selection| selection.messages.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn selected_peer(&self) -> Option<Uuid> {
        lock(&self.inner)
            .selection
            .as_ref()
            .map(|selection| selection.peer)
    }

    #[must_use]
    pub fn online_users(&self) -> Vec<Uuid> {
        lock(&self.inner).online.iter().copied().collect()
    }

    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        lock(&self.inner).online.contains(&user_id)
    }

    /// Number of live delivery subscriptions; at most one by construction.
    #[must_use]
    pub fn active_subscriptions(&self) -> usize {
        usize::from(lock(&self.inner).selection.is_some())
    }
}

fn dedupe_by_id(messages: Vec<Message>) -> Vec<Message> {
    let mut seen = BTreeSet::new();
    messages
        .into_iter()
        .filter(|message| seen.insert(message.id))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{PresenceSnapshot, Timestamp};

    fn message(sender_id: Uuid, recipient_id: Uuid, text: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            sender_id,
            recipient_id,
            text: Some(text.to_string()),
            media: None,
            created_at: Timestamp::now(),
        }
    }

    #[test]
    fn lifecycle_transitions() {
        let agent = SyncAgent::new();
        assert_eq!(agent.state(), ConnectionState::Disconnected);

        agent.begin_connect();
        assert_eq!(agent.state(), ConnectionState::Connecting);

        assert!(!agent.mark_connected());
        assert_eq!(agent.state(), ConnectionState::Connected);

        agent.connection_lost();
        assert_eq!(agent.state(), ConnectionState::Reconnecting);

        agent.begin_connect();
        assert_eq!(agent.state(), ConnectionState::Reconnecting);

        agent.disconnect();
        assert_eq!(agent.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn reconnect_with_a_selection_requires_resync() {
        let agent = SyncAgent::new();
        agent.begin_connect();
        let _ = agent.mark_connected();

        let peer = Uuid::new_v4();
        let _subscription = agent.subscribe(peer, Vec::new());

        agent.connection_lost();
        agent.begin_connect();
        assert!(agent.mark_connected());
    }

    #[test]
    fn delivery_from_selected_peer_appends_exactly_once() {
        let agent = SyncAgent::new();
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let _subscription = agent.subscribe(peer, Vec::new());

        let incoming = message(peer, me, "hi");
        agent.handle_event(StreamEvent::Delivery(incoming.clone()));
        agent.handle_event(StreamEvent::Delivery(incoming.clone()));

        assert_eq!(agent.conversation(), vec![incoming]);
    }

    #[test]
    fn delivery_from_other_peers_is_silently_dropped() {
        let agent = SyncAgent::new();
        let (me, peer, other) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
        let _subscription = agent.subscribe(peer, Vec::new());

        agent.handle_event(StreamEvent::Delivery(message(other, me, "psst")));
        assert!(agent.conversation().is_empty());
    }

    #[test]
    fn selecting_a_peer_replaces_conversation_state() {
        let agent = SyncAgent::new();
        let (me, bob, carol) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let _bob_sub = agent.subscribe(bob, vec![message(bob, me, "from bob")]);
        assert_eq!(agent.conversation().len(), 1);

        let _carol_sub = agent.subscribe(carol, vec![message(carol, me, "from carol")]);
        let conversation = agent.conversation();
        assert_eq!(conversation.len(), 1);
        assert_eq!(conversation[0].sender_id, carol);
    }

    #[test]
    fn repeated_peer_switching_leaves_one_subscription() {
        let agent = SyncAgent::new();
        let (me, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());

        let sub_b1 = agent.subscribe(b, Vec::new());
        let sub_c = agent.subscribe(c, Vec::new());
        let _sub_b2 = agent.subscribe(b, Vec::new());

        // Dropping superseded guards must not tear down the live one.
        drop(sub_b1);
        drop(sub_c);

        assert_eq!(agent.active_subscriptions(), 1);
        assert_eq!(agent.selected_peer(), Some(b));

        let incoming = message(b, me, "still wired");
        agent.handle_event(StreamEvent::Delivery(incoming.clone()));
        assert_eq!(agent.conversation(), vec![incoming]);
    }

    #[test]
    fn dropping_the_live_subscription_unsubscribes() {
        let agent = SyncAgent::new();
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());

        let subscription = agent.subscribe(peer, Vec::new());
        drop(subscription);

        assert_eq!(agent.active_subscriptions(), 0);
        agent.handle_event(StreamEvent::Delivery(message(peer, me, "void")));
        assert!(agent.conversation().is_empty());
    }

    #[test]
    fn presence_snapshots_are_full_replacements() {
        let agent = SyncAgent::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        agent.handle_event(StreamEvent::Presence(PresenceSnapshot {
            user_ids: vec![a, b],
        }));
        assert!(agent.is_online(a) && agent.is_online(b));

        agent.handle_event(StreamEvent::Presence(PresenceSnapshot { user_ids: vec![b] }));
        assert!(!agent.is_online(a));
        assert!(agent.is_online(b));
    }

    #[test]
    fn connection_loss_clears_the_online_set() {
        let agent = SyncAgent::new();
        let user = Uuid::new_v4();
        agent.begin_connect();
        let _ = agent.mark_connected();
        agent.handle_event(StreamEvent::Presence(PresenceSnapshot {
            user_ids: vec![user],
        }));

        agent.connection_lost();
        assert!(!agent.is_online(user));
    }

    #[test]
    fn history_resync_deduplicates_against_live_pushes() {
        let agent = SyncAgent::new();
        let (me, peer) = (Uuid::new_v4(), Uuid::new_v4());
        let _subscription = agent.subscribe(peer, Vec::new());

        let pushed = message(peer, me, "hello");
        agent.handle_event(StreamEvent::Delivery(pushed.clone()));

        // The refetched history already contains the pushed message.
        agent.replace_history(vec![pushed.clone()]);
        assert_eq!(agent.conversation(), vec![pushed]);
    }
}
