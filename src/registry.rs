//! Registry of live sessions.
//!
//! [`ConnectionRegistry`] maps [`ConnectionId`]s to [`Peer`] handles so
//! route-back and supervision code can reach any live session. Session
//! starters insert an entry when a session starts and remove it once the
//! session has been disposed.

use std::fmt;

use dashmap::DashMap;
use tracing::debug;

use crate::{
    peer::{Peer, PeerRole},
    session::ConnectionId,
};

/// Concurrent map of live peers keyed by [`ConnectionId`].
pub struct ConnectionRegistry<R>(DashMap<ConnectionId, Peer<R>>);

impl<R> Default for ConnectionRegistry<R> {
    fn default() -> Self { Self(DashMap::new()) }
}

impl<R> fmt::Debug for ConnectionRegistry<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("len", &self.0.len())
            .finish()
    }
}

impl<R: PeerRole> ConnectionRegistry<R> {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Insert the handle for a newly started session.
    ///
    /// Replaces any previous entry with the same id.
    pub fn insert(&self, peer: Peer<R>) {
        let id = peer.connection_id();
        self.0.insert(id, peer);
        debug!(%id, role = R::NAME, "peer registered");
    }

    /// Retrieve the handle for `id`, if the session is still registered.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<Peer<R>> {
        self.0.get(&id).map(|entry| entry.value().clone())
    }

    /// Remove the handle for `id`, typically on session disposal.
    pub fn remove(&self, id: ConnectionId) -> Option<Peer<R>> {
        let removed = self.0.remove(&id).map(|(_, peer)| peer);
        if removed.is_some() {
            debug!(%id, role = R::NAME, "peer removed");
        }
        removed
    }

    /// `true` if a session with `id` is registered.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool { self.0.contains_key(&id) }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// `true` if no sessions are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    /// Identifiers of every registered session.
    ///
    /// This holds per-shard read locks while iterating.
    #[must_use]
    pub fn ids(&self) -> Vec<ConnectionId> { self.0.iter().map(|entry| *entry.key()).collect() }

    /// Ask the session `id` to stop.
    ///
    /// Returns `false` if no such session is registered. The entry itself is
    /// removed once the session has been disposed.
    pub fn disconnect(&self, id: ConnectionId) -> bool {
        let Some(peer) = self.get(id) else {
            return false;
        };
        peer.disconnect();
        true
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use rstest::{fixture, rstest};
    use tokio_util::sync::CancellationToken;
    use tracing_test::traced_test;

    use super::*;
    use crate::{
        peer::{SendService, ServerRole},
        queue::{QueueConfig, outgoing_queue},
        serializer::BincodeSerializer,
        session::{NetworkAddressInfo, SessionDetails},
    };

    fn peer(id: u64) -> Peer<ServerRole> {
        let id = ConnectionId::new(id);
        let (sender, _queue) = outgoing_queue(QueueConfig::unbounded());
        let service = SendService::new(sender, Arc::new(BincodeSerializer), 1024, id);
        Peer::new(
            SessionDetails::new(id, NetworkAddressInfo::UNSPECIFIED),
            service,
            CancellationToken::new(),
            None,
        )
    }

    #[fixture]
    fn registry() -> ConnectionRegistry<ServerRole> { ConnectionRegistry::new() }

    #[rstest]
    #[traced_test]
    fn insert_and_remove_are_traced(registry: ConnectionRegistry<ServerRole>) {
        registry.insert(peer(7));
        assert!(registry.contains(ConnectionId::new(7)));
        assert!(registry.remove(ConnectionId::new(7)).is_some());
        assert!(registry.remove(ConnectionId::new(7)).is_none());
        assert!(registry.is_empty());

        assert!(logs_contain("peer registered"));
        assert!(logs_contain("peer removed"));
    }

    #[rstest]
    fn disconnect_cancels_registered_peer_only(registry: ConnectionRegistry<ServerRole>) {
        let first = peer(1);
        registry.insert(first.clone());
        registry.insert(peer(2));

        assert!(registry.disconnect(ConnectionId::new(1)));
        assert!(!registry.disconnect(ConnectionId::new(3)));
        assert!(first.is_disconnected());
        assert!(!registry.get(ConnectionId::new(2)).expect("registered").is_disconnected());
        // Entries stay until their sessions are disposed.
        assert_eq!(registry.len(), 2);

        let mut ids = registry.ids();
        ids.sort();
        assert_eq!(ids, vec![ConnectionId::new(1), ConnectionId::new(2)]);
    }
}
