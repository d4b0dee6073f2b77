//! Outbound broadcast
//!
//! A message is encrypted once, wrapped in one envelope and encoded as one
//! frame; that identical frame is written to every peer of a registry
//! snapshot concurrently. A failed write only affects its own peer, which is
//! removed once all writes have settled.

use std::collections::BTreeSet;
use std::sync::Arc;

use futures::future::join_all;
use kqsp_core::{
    protocol::file, CipherEngine, Envelope, EventSink, FrameCodec, GroupKey, MeshEvent,
    MeshResult, PeerId,
};
use tracing::{debug, warn};

use crate::managers::{Membership, PeerRegistry};

/// Result of one broadcast
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BroadcastOutcome {
    /// Every peer of the snapshot accepted the frame
    Delivered { recipients: usize },
    /// Some peers failed; they have been removed
    PartialFailure {
        delivered: usize,
        failed: BTreeSet<PeerId>,
    },
    /// Every peer failed; they have all been removed
    TotalFailure { failed: BTreeSet<PeerId> },
    /// Nobody to send to; no I/O was attempted
    NoPeers,
    /// No group key; no I/O was attempted
    KeyNotReady,
}

impl BroadcastOutcome {
    /// At least one peer received the frame
    pub fn reached_anyone(&self) -> bool {
        matches!(
            self,
            BroadcastOutcome::Delivered { .. } | BroadcastOutcome::PartialFailure { .. }
        )
    }
}

/// Sends user-originated messages to the whole mesh
#[derive(Clone)]
pub struct Broadcaster {
    registry: Arc<PeerRegistry>,
    events: EventSink,
    codec: FrameCodec,
    display_name: String,
}

impl Broadcaster {
    pub fn new(
        registry: Arc<PeerRegistry>,
        events: EventSink,
        codec: FrameCodec,
        display_name: String,
    ) -> Self {
        Self {
            registry,
            events,
            codec,
            display_name,
        }
    }

    /// Encrypt and send a text message to every registered peer
    pub async fn send(&self, plaintext: &str) -> MeshResult<BroadcastOutcome> {
        let membership = self.registry.members().await;
        self.deliver(membership, |key| {
            Envelope::text(
                self.display_name.clone(),
                CipherEngine::encrypt(plaintext.as_bytes(), key),
            )
        })
        .await
    }

    /// Send a file, optionally sealed with a password instead of the group key
    pub async fn send_file(
        &self,
        filename: &str,
        contents: &[u8],
        password: Option<&str>,
    ) -> MeshResult<BroadcastOutcome> {
        let membership = self.registry.members().await;
        self.deliver(membership, |key| {
            let (data, protected) = file::seal(contents, key, password);
            Envelope::File {
                from: self.display_name.clone(),
                filename: filename.to_string(),
                protected,
                data,
            }
        })
        .await
    }

    async fn deliver<F>(&self, membership: Membership, build: F) -> MeshResult<BroadcastOutcome>
    where
        F: FnOnce(&GroupKey) -> Envelope,
    {
        if membership.is_empty() {
            return Ok(BroadcastOutcome::NoPeers);
        }
        let Some(key) = membership.key else {
            return Ok(BroadcastOutcome::KeyNotReady);
        };

        let payload = build(&key).encode()?;
        let frame = self.codec.encode(&payload)?;

        let writes = membership.peers.iter().map(|(id, conn)| {
            let frame = &frame;
            async move { (id, conn, conn.send_frame(frame).await) }
        });
        let results = join_all(writes).await;

        let mut delivered = 0;
        let mut failed = BTreeSet::new();
        for (id, conn, result) in results {
            match result {
                Ok(()) => delivered += 1,
                Err(e) => {
                    warn!(peer_id = %id, "Failed to send: {}", e);
                    if self
                        .registry
                        .unregister_connection(id, conn.id())
                        .await
                        .is_some()
                    {
                        self.events
                            .try_emit(MeshEvent::PeerDisconnected { peer_id: id.clone() });
                    }
                    conn.close().await;
                    failed.insert(id.clone());
                }
            }
        }

        debug!(delivered, failed = failed.len(), "Broadcast finished");
        Ok(match (delivered, failed.is_empty()) {
            (n, true) => BroadcastOutcome::Delivered { recipients: n },
            (0, false) => BroadcastOutcome::TotalFailure { failed },
            (n, false) => BroadcastOutcome::PartialFailure {
                delivered: n,
                failed,
            },
        })
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
