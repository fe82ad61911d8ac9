//! Presence fan-out: one `user_status_changed` event to every live
//! connection whenever a user comes online or goes offline.

use std::sync::Arc;

use chrono::Utc;
use tracing::debug;

use missive_shared::protocol::PresenceUpdate;
use missive_shared::{ServerEvent, UserId};

use crate::registry::PresenceRegistry;

/// Fans presence transitions out to every live connection, the subject's
/// own included (clients use their own transition as connect feedback).
#[derive(Clone)]
pub struct PresenceBroadcaster {
    registry: Arc<PresenceRegistry>,
}

impl PresenceBroadcaster {
    pub fn new(registry: Arc<PresenceRegistry>) -> Self {
        Self { registry }
    }

    /// Broadcast one online/offline transition.
    ///
    /// Delivery is queue-and-forget per connection: a receiver mid-close is
    /// skipped without delaying the others.
    pub fn broadcast(&self, user_id: UserId, is_online: bool) {
        let event = ServerEvent::UserStatusChanged(PresenceUpdate {
            user_id,
            is_online,
            timestamp: Utc::now(),
        });

        let connections = self.registry.connections();
        for conn in &connections {
            if !conn.send(event.clone()) {
                debug!(
                    target_user = %conn.user_id.short(),
                    "Dropped presence event for closing connection"
                );
            }
        }

        debug!(
            user = %user_id.short(),
            is_online,
            fanout = connections.len(),
            "Broadcast presence change"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use tokio::sync::mpsc;

    use crate::registry::{ConnectionHandle, SessionCommand};

    fn connect(
        registry: &PresenceRegistry,
        name: &str,
    ) -> (UserId, mpsc::UnboundedReceiver<SessionCommand>) {
        let user = UserId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        registry.register(ConnectionHandle::new(user, name.to_string(), tx));
        (user, rx)
    }

    fn drain_status_events(
        rx: &mut mpsc::UnboundedReceiver<SessionCommand>,
    ) -> Vec<PresenceUpdate> {
        let mut updates = Vec::new();
        while let Ok(command) = rx.try_recv() {
            if let SessionCommand::Event(ServerEvent::UserStatusChanged(update)) = command {
                updates.push(update);
            }
        }
        updates
    }

    #[test]
    fn test_broadcast_reaches_everyone_including_subject() {
        let registry = Arc::new(PresenceRegistry::new());
        let broadcaster = PresenceBroadcaster::new(registry.clone());

        let (alice, mut alice_rx) = connect(&registry, "alice");
        let (_bob, mut bob_rx) = connect(&registry, "bob");

        broadcaster.broadcast(alice, true);

        let to_alice = drain_status_events(&mut alice_rx);
        let to_bob = drain_status_events(&mut bob_rx);

        // Exactly one event per connection, the subject's own included.
        assert_eq!(to_alice.len(), 1);
        assert_eq!(to_bob.len(), 1);
        assert_eq!(to_bob[0].user_id, alice);
        assert!(to_bob[0].is_online);
    }

    #[test]
    fn test_closed_receiver_does_not_stall_the_rest() {
        let registry = Arc::new(PresenceRegistry::new());
        let broadcaster = PresenceBroadcaster::new(registry.clone());

        let (gone, gone_rx) = connect(&registry, "gone");
        let (_carol, mut carol_rx) = connect(&registry, "carol");

        // The session task died without unregistering yet.
        drop(gone_rx);

        broadcaster.broadcast(gone, false);

        let to_carol = drain_status_events(&mut carol_rx);
        assert_eq!(to_carol.len(), 1);
        assert_eq!(to_carol[0].user_id, gone);
        assert!(!to_carol[0].is_online);
    }
}
