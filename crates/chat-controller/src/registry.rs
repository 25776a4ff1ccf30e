//! Session registry - live connection tracking.
//!
//! Maps connections to users and back. A user with several devices has
//! several entries under one [`UserId`]; user-addressed delivery (call
//! signaling) goes through [`SessionRegistry::deliver_to_user`], which
//! pushes to every live device and tolerates individual failures.
//!
//! Room-addressed delivery does NOT go through the registry; each
//! `RoomActor` owns its subscriber set. The registry only remembers which
//! rooms a connection subscribed to so disconnect cleanup can unsubscribe
//! them.

use common::types::{ConnectionId, RoomId, UserId};
use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};
use tracing::debug;

use crate::actors::connection::ConnectionHandle;
use crate::transport::ServerFrame;

/// A registered connection and the rooms it subscribed to.
#[derive(Debug)]
struct SessionEntry {
    handle: ConnectionHandle,
    rooms: HashSet<RoomId>,
}

#[derive(Debug, Default)]
struct Inner {
    connections: HashMap<ConnectionId, SessionEntry>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
}

/// Registry of live connections, shared across the transport layer and
/// the call coordinator.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly spawned connection.
    pub fn register(&self, handle: ConnectionHandle) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let connection_id = handle.connection_id();
        let user_id = handle.user_id();

        inner
            .by_user
            .entry(user_id)
            .or_default()
            .insert(connection_id);
        inner.connections.insert(
            connection_id,
            SessionEntry {
                handle,
                rooms: HashSet::new(),
            },
        );

        debug!(
            target: "chat.registry",
            connection_id = %connection_id,
            user_id = %user_id,
            "Connection registered"
        );
    }

    /// Remove a connection. Returns its user and subscribed rooms so the
    /// caller can unsubscribe it from each room actor.
    pub fn deregister(&self, connection_id: ConnectionId) -> Option<(UserId, HashSet<RoomId>)> {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);

        let entry = inner.connections.remove(&connection_id)?;
        let user_id = entry.handle.user_id();

        if let Some(set) = inner.by_user.get_mut(&user_id) {
            set.remove(&connection_id);
            if set.is_empty() {
                inner.by_user.remove(&user_id);
            }
        }

        debug!(
            target: "chat.registry",
            connection_id = %connection_id,
            user_id = %user_id,
            rooms = entry.rooms.len(),
            "Connection deregistered"
        );

        Some((user_id, entry.rooms))
    }

    /// Remember that a connection subscribed to a room.
    pub fn track_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.rooms.insert(room_id);
        }
    }

    /// Forget a room subscription.
    pub fn untrack_room(&self, connection_id: ConnectionId, room_id: RoomId) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(entry) = inner.connections.get_mut(&connection_id) {
            entry.rooms.remove(&room_id);
        }
    }

    /// All live connection handles for a user (multi-device).
    #[must_use]
    pub fn connections_for_user(&self, user_id: UserId) -> Vec<ConnectionHandle> {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);

        inner
            .by_user
            .get(&user_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| inner.connections.get(id))
                    .map(|entry| entry.handle.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Push a frame to every live device of a user.
    ///
    /// Best-effort: a device with a full queue is disconnected by its own
    /// handle and skipped. Returns the number of devices the frame was
    /// queued to; zero means the user is offline.
    pub fn deliver_to_user(&self, user_id: UserId, frame: &ServerFrame) -> usize {
        let handles = self.connections_for_user(user_id);
        let mut delivered = 0;
        for handle in handles {
            if handle.try_deliver(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }

    /// Whether a user has at least one live connection.
    #[must_use]
    pub fn is_online(&self, user_id: UserId) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_user.contains_key(&user_id)
    }

    /// Number of live connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.connections.len()
    }

    /// Number of distinct online users.
    #[must_use]
    pub fn user_count(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.by_user.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::actors::connection::ConnectionActor;
    use crate::actors::metrics::ActorMetrics;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;

    fn spawn_connection(user_id: UserId) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
        let (outlet_tx, outlet_rx) = mpsc::channel(16);
        let (handle, _task) = ConnectionActor::spawn(
            ConnectionId::new(),
            user_id,
            16,
            outlet_tx,
            CancellationToken::new(),
            ActorMetrics::new(),
        );
        (handle, outlet_rx)
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = spawn_connection(user);
        let connection_id = handle.connection_id();

        registry.register(handle);
        assert_eq!(registry.connection_count(), 1);
        assert!(registry.is_online(user));

        let (dereg_user, rooms) = registry
            .deregister(connection_id)
            .expect("connection should be registered");
        assert_eq!(dereg_user, user);
        assert!(rooms.is_empty());
        assert_eq!(registry.connection_count(), 0);
        assert!(!registry.is_online(user));
    }

    #[tokio::test]
    async fn test_deregister_unknown_connection() {
        let registry = SessionRegistry::new();
        assert!(registry.deregister(ConnectionId::new()).is_none());
    }

    #[tokio::test]
    async fn test_multi_device_user() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let (h1, _rx1) = spawn_connection(user);
        let (h2, _rx2) = spawn_connection(user);

        registry.register(h1.clone());
        registry.register(h2);

        assert_eq!(registry.connection_count(), 2);
        assert_eq!(registry.user_count(), 1);
        assert_eq!(registry.connections_for_user(user).len(), 2);

        // Dropping one device keeps the user online
        registry.deregister(h1.connection_id());
        assert!(registry.is_online(user));
        assert_eq!(registry.connections_for_user(user).len(), 1);
    }

    #[tokio::test]
    async fn test_room_tracking_survives_until_deregister() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let (handle, _rx) = spawn_connection(user);
        let connection_id = handle.connection_id();
        let room_a = RoomId::new();
        let room_b = RoomId::new();

        registry.register(handle);
        registry.track_room(connection_id, room_a);
        registry.track_room(connection_id, room_b);
        registry.untrack_room(connection_id, room_b);

        let (_, rooms) = registry
            .deregister(connection_id)
            .expect("connection should be registered");
        assert_eq!(rooms, HashSet::from([room_a]));
    }

    #[tokio::test]
    async fn test_deliver_to_user_reaches_all_devices() {
        let registry = SessionRegistry::new();
        let user = UserId::new();
        let (h1, mut rx1) = spawn_connection(user);
        let (h2, mut rx2) = spawn_connection(user);

        registry.register(h1);
        registry.register(h2);

        let frame = ServerFrame::CallAccepted {
            call_id: common::types::CallId::new(),
        };
        let delivered = registry.deliver_to_user(user, &frame);
        assert_eq!(delivered, 2);

        assert_eq!(rx1.recv().await, Some(frame.clone()));
        assert_eq!(rx2.recv().await, Some(frame));
    }

    #[tokio::test]
    async fn test_deliver_to_offline_user() {
        let registry = SessionRegistry::new();
        let frame = ServerFrame::CallRejected {
            call_id: common::types::CallId::new(),
        };
        assert_eq!(registry.deliver_to_user(UserId::new(), &frame), 0);
    }
}
