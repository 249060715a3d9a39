use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use chrono::{DateTime, Utc};
use shared::models::StreamEvent;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::presence::PresenceBroadcaster;

/// A live connection's delivery endpoint.
///
/// The connection id is unique per process and identifies one generation of
/// a user's connection; it is what lets a disconnect from a superseded
/// connection be recognized as stale.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    connection_id: u64,
    sender: mpsc::Sender<StreamEvent>,
}

impl ConnectionHandle {
    /// Process-unique id of this connection generation.
    #[must_use]
    pub fn connection_id(&self) -> u64 {
        self.connection_id
    }

    /// Pushes an event without blocking. Errors mean the receiver is full
    /// or gone; callers treat both as an unreachable connection.
    pub(crate) fn try_send(
        &self,
        event: StreamEvent,
    ) -> Result<(), mpsc::error::TrySendError<StreamEvent>> {
        self.sender.try_send(event)
    }
}

#[derive(Debug)]
struct Binding {
    handle: ConnectionHandle,
    #[allow(dead_code)]
    connected_at: DateTime<Utc>,
}

/// In-memory map from user id to that user's single live connection.
///
/// Exactly one connection is tracked per user: registering again replaces
/// the prior binding (last-write-wins), which silently ends delivery to the
/// superseded session. Every mutation announces the new online set through
/// the presence broadcaster.
#[derive(Debug)]
pub struct ConnectionRegistry {
    bindings: Mutex<HashMap<Uuid, Binding>>,
    next_connection_id: AtomicU64,
    broadcaster: PresenceBroadcaster,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new(broadcaster: PresenceBroadcaster) -> Self {
        Self {
            bindings: Mutex::new(HashMap::new()),
            next_connection_id: AtomicU64::new(1),
            broadcaster,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Binding>> {
        // Bookkeeping must never fail the caller, poisoned or not.
        self.bindings.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Binds `user_id` to a new connection, replacing any existing binding.
    pub fn register(&self, user_id: Uuid, sender: mpsc::Sender<StreamEvent>) -> ConnectionHandle {
        let handle = ConnectionHandle {
            connection_id: self.next_connection_id.fetch_add(1, Ordering::Relaxed),
            sender,
        };

        let (targets, online) = {
            let mut bindings = self.lock();
            bindings.insert(
                user_id,
                Binding {
                    handle: handle.clone(),
                    connected_at: Utc::now(),
                },
            );
            Self::collect(&bindings)
        };

        self.broadcaster.announce(&targets, online);
        handle
    }

    /// Removes the binding for `user_id`, but only while it still belongs
    /// to `handle`. A disconnect arriving after the user re-registered is a
    /// no-op, so the newer binding survives.
    pub fn unregister(&self, user_id: Uuid, handle: &ConnectionHandle) {
        let announcement = {
            let mut bindings = self.lock();
            match bindings.get(&user_id) {
                Some(binding) if binding.handle.connection_id == handle.connection_id => {
                    bindings.remove(&user_id);
                    Some(Self::collect(&bindings))
                }
                _ => None,
            }
        };

        if let Some((targets, online)) = announcement {
            self.broadcaster.announce(&targets, online);
        }
    }

    /// Whether `user_id` currently has a live connection.
    #[must_use]
    pub fn is_online(&self, user_id: Uuid) -> bool {
        self.lock().contains_key(&user_id)
    }

    /// The current online-user set.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Uuid> {
        let bindings = self.lock();
        let mut online: Vec<Uuid> = bindings.keys().copied().collect();
        online.sort_unstable();
        online
    }

    /// The live connection for `user_id`, if any.
    #[must_use]
    pub fn lookup(&self, user_id: Uuid) -> Option<ConnectionHandle> {
        self.lock().get(&user_id).map(|binding| binding.handle.clone())
    }

    fn collect(bindings: &HashMap<Uuid, Binding>) -> (Vec<ConnectionHandle>, Vec<Uuid>) {
        let targets = bindings
            .values()
            .map(|binding| binding.handle.clone())
            .collect();
        let mut online: Vec<Uuid> = bindings.keys().copied().collect();
        online.sort_unstable();
        (targets, online)
    }
}
