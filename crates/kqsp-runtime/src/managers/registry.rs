//! Peer registry
//!
//! The registry is the single source of truth for mesh membership. Every
//! mutation recomputes the group key under the same write lock, so readers
//! always observe a membership set together with the key derived from it.

use std::collections::{BTreeSet, HashMap};

use kqsp_core::{GroupKey, GroupKeyDeriver, PeerId};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::connection::{ConnectionId, PeerConnection, PeerState};

// ----------------------------------------------------------------------------
// Snapshots
// ----------------------------------------------------------------------------

/// Listing entry for one registered peer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub id: PeerId,
    pub state: PeerState,
    pub remote_addr: Option<String>,
}

/// Point-in-time copy of the membership and its key
#[derive(Debug, Clone)]
pub struct Membership {
    pub peers: Vec<(PeerId, PeerConnection)>,
    pub key: Option<GroupKey>,
}

impl Membership {
    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ----------------------------------------------------------------------------
// Peer Registry
// ----------------------------------------------------------------------------

struct RegistryState {
    peers: HashMap<PeerId, PeerConnection>,
    key: Option<GroupKey>,
}

/// Owns the mapping of peer id to live connection
pub struct PeerRegistry {
    self_id: PeerId,
    state: RwLock<RegistryState>,
}

impl PeerRegistry {
    /// Create an empty registry; the key starts as the solo key over `{self_id}`
    pub fn new(self_id: PeerId) -> Self {
        let key = GroupKeyDeriver::derive(&self_id, &[] as &[PeerId]);
        Self {
            self_id,
            state: RwLock::new(RegistryState {
                peers: HashMap::new(),
                key: Some(key),
            }),
        }
    }

    pub fn self_id(&self) -> &PeerId {
        &self.self_id
    }

    fn rekey(&self, state: &mut RegistryState) -> GroupKey {
        let key = GroupKeyDeriver::derive(&self.self_id, state.peers.keys());
        state.key = Some(key);
        key
    }

    /// Register a peer, replacing and closing any previous connection for `id`
    ///
    /// Returns the group key derived for the new membership.
    pub async fn register(&self, id: PeerId, connection: PeerConnection) -> GroupKey {
        let (replaced, key) = {
            let mut state = self.state.write().await;
            let replaced = state.peers.insert(id.clone(), connection);
            let key = self.rekey(&mut state);
            (replaced, key)
        };

        if let Some(old) = replaced {
            info!(peer_id = %id, old = %old.id(), "Replacing existing connection");
            old.close().await;
        }
        debug!(peer_id = %id, key = %key.fingerprint(), "Peer registered");
        key
    }

    /// Remove a peer regardless of which connection it holds
    pub async fn unregister(&self, id: &PeerId) -> Option<PeerConnection> {
        let mut state = self.state.write().await;
        let removed = state.peers.remove(id)?;
        let key = self.rekey(&mut state);
        debug!(peer_id = %id, key = %key.fingerprint(), "Peer unregistered");
        Some(removed)
    }

    /// Remove a peer only while it is still bound to `connection`
    ///
    /// A handler or broadcaster cleaning up a replaced connection must not
    /// evict the replacement. Only the first caller for a given connection
    /// gets `Some`.
    pub async fn unregister_connection(
        &self,
        id: &PeerId,
        connection: ConnectionId,
    ) -> Option<PeerConnection> {
        let mut state = self.state.write().await;
        if state.peers.get(id).map(PeerConnection::id) != Some(connection) {
            return None;
        }
        let removed = state.peers.remove(id)?;
        let key = self.rekey(&mut state);
        debug!(peer_id = %id, key = %key.fingerprint(), "Peer unregistered");
        Some(removed)
    }

    /// Point-in-time copy of the registered ids
    pub async fn snapshot(&self) -> BTreeSet<PeerId> {
        self.state.read().await.peers.keys().cloned().collect()
    }

    /// Connections and key taken under one read lock
    pub async fn members(&self) -> Membership {
        let state = self.state.read().await;
        let mut peers: Vec<_> = state
            .peers
            .iter()
            .map(|(id, conn)| (id.clone(), conn.clone()))
            .collect();
        peers.sort_by(|a, b| a.0.cmp(&b.0));
        Membership {
            peers,
            key: state.key,
        }
    }

    /// Visit every peer of a snapshot; mutations during the walk are not seen
    pub async fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&PeerId, &PeerConnection),
    {
        for (id, conn) in self.members().await.peers {
            f(&id, &conn);
        }
    }

    pub async fn peers(&self) -> Vec<PeerInfo> {
        self.members()
            .await
            .peers
            .into_iter()
            .map(|(id, conn)| PeerInfo {
                id,
                state: conn.state(),
                remote_addr: conn.remote_addr().map(str::to_string),
            })
            .collect()
    }

    pub async fn group_key(&self) -> Option<GroupKey> {
        self.state.read().await.key
    }

    pub async fn contains(&self, id: &PeerId) -> bool {
        self.state.read().await.peers.contains_key(id)
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove and close every connection; returns how many were closed
    pub async fn close_all(&self) -> usize {
        let drained: Vec<_> = {
            let mut state = self.state.write().await;
            let drained: Vec<(PeerId, PeerConnection)> = state.peers.drain().collect();
            self.rekey(&mut state);
            drained
        };

        for (_, conn) in &drained {
            conn.close().await;
        }
        drained.len()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
