//! Connection registry: who is online, and on which connection.
//!
//! Each user holds at most one live connection. Registering a new
//! connection displaces the previous one; the displaced session is told
//! to shut down, and its eventual unregister becomes a no-op.

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use missive_shared::{ConnId, ServerEvent, UserId};

/// Control messages delivered to a session task.
#[derive(Debug)]
pub enum SessionCommand {
    /// An event to serialize and push over the socket.
    Event(ServerEvent),
    /// A newer connection took over this user; shut down quietly.
    Replaced,
}

/// Handle to one live connection, cloneable out of the registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub conn_id: ConnId,
    pub user_id: UserId,
    pub username: String,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl ConnectionHandle {
    pub fn new(
        user_id: UserId,
        username: String,
        tx: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self {
            conn_id: ConnId::new(),
            user_id,
            username,
            tx,
        }
    }

    /// Queue an event for delivery. Returns false if the session task is
    /// already gone; callers treat that as a missed push, never an error.
    pub fn send(&self, event: ServerEvent) -> bool {
        self.tx.send(SessionCommand::Event(event)).is_ok()
    }

    /// Tell the session task it has been replaced by a newer connection.
    pub fn replace(&self) {
        let _ = self.tx.send(SessionCommand::Replaced);
    }
}

/// Live connections keyed by user.
pub struct PresenceRegistry {
    connections: DashMap<UserId, ConnectionHandle>,
}

impl PresenceRegistry {
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
        }
    }

    /// Register a connection, returning the handle it displaced (if any).
    pub fn register(&self, handle: ConnectionHandle) -> Option<ConnectionHandle> {
        let user_id = handle.user_id;
        let username = handle.username.clone();
        let previous = self.connections.insert(user_id, handle);

        info!(
            user = %user_id.short(),
            username = %username,
            online = self.connections.len(),
            replaced = previous.is_some(),
            "Registered connection"
        );

        previous
    }

    /// Remove `conn_id`'s mapping for `user_id`.
    ///
    /// Guarded: a stale close, arriving after a newer connection replaced
    /// this one, leaves the newer mapping in place and returns false.
    pub fn unregister(&self, user_id: UserId, conn_id: ConnId) -> bool {
        let removed = self
            .connections
            .remove_if(&user_id, |_, handle| handle.conn_id == conn_id)
            .is_some();

        if removed {
            info!(
                user = %user_id.short(),
                online = self.connections.len(),
                "Unregistered connection"
            );
        } else {
            debug!(user = %user_id.short(), "Ignored stale unregister");
        }

        removed
    }

    /// Look up the live connection for a user.
    pub fn lookup(&self, user_id: UserId) -> Option<ConnectionHandle> {
        self.connections
            .get(&user_id)
            .map(|entry| entry.value().clone())
    }

    #[allow(dead_code)]
    pub fn is_online(&self, user_id: UserId) -> bool {
        self.connections.contains_key(&user_id)
    }

    /// Snapshot of every live connection, for fan-out.
    pub fn connections(&self) -> Vec<ConnectionHandle> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    #[allow(dead_code)]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}

impl Default for PresenceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect(
        registry: &PresenceRegistry,
        user: UserId,
        name: &str,
    ) -> (ConnectionHandle, mpsc::UnboundedReceiver<SessionCommand>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = ConnectionHandle::new(user, name.to_string(), tx);
        registry.register(handle.clone());
        (handle, rx)
    }

    #[test]
    fn test_register_replaces_previous() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();

        let (first, _rx1) = connect(&registry, user, "alice");
        let (second, _rx2) = connect(&registry, user, "alice");

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.lookup(user).map(|h| h.conn_id),
            Some(second.conn_id)
        );
        assert_ne!(first.conn_id, second.conn_id);
    }

    #[test]
    fn test_register_returns_displaced_handle() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();

        let (first, _rx1) = connect(&registry, user, "alice");

        let (tx, _rx2) = mpsc::unbounded_channel();
        let second = ConnectionHandle::new(user, "alice".to_string(), tx);
        let previous = registry.register(second);

        assert_eq!(previous.map(|h| h.conn_id), Some(first.conn_id));
    }

    #[test]
    fn test_replace_notifies_session_task() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (first, mut rx) = connect(&registry, user, "alice");

        first.replace();
        assert!(matches!(rx.try_recv(), Ok(SessionCommand::Replaced)));
    }

    #[test]
    fn test_stale_unregister_keeps_newer_connection() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();

        let (first, _rx1) = connect(&registry, user, "alice");
        let (second, _rx2) = connect(&registry, user, "alice");

        // The first session closes late; its unregister must not evict
        // the connection that replaced it.
        assert!(!registry.unregister(user, first.conn_id));
        assert!(registry.is_online(user));

        assert!(registry.unregister(user, second.conn_id));
        assert!(!registry.is_online(user));
    }

    #[test]
    fn test_send_delivers_through_channel() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (handle, mut rx) = connect(&registry, user, "bob");

        assert!(handle.send(ServerEvent::error("nope")));
        match rx.try_recv() {
            Ok(SessionCommand::Event(ServerEvent::Error(payload))) => {
                assert_eq!(payload.message, "nope");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_send_to_dropped_session_fails() {
        let registry = PresenceRegistry::new();
        let user = UserId::new();
        let (handle, rx) = connect(&registry, user, "bob");

        drop(rx);
        assert!(!handle.send(ServerEvent::error("nope")));
    }
}
