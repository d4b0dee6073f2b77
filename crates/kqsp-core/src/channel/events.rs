//! Presentation events
//!
//! Everything a connection handler or the runtime wants the user to see is a
//! `MeshEvent`. Rendering is left to the consumer; `Display` gives the plain
//! terminal form.

use core::fmt;

use crate::types::PeerId;

/// Event delivered from the mesh to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MeshEvent {
    /// A decrypted text message
    Message {
        peer_id: PeerId,
        from: String,
        body: String,
    },
    /// An unprotected file, already decrypted
    FileReceived {
        peer_id: PeerId,
        from: String,
        filename: String,
        contents: Vec<u8>,
    },
    /// A password-protected file, still encrypted
    ProtectedFileReceived {
        peer_id: PeerId,
        from: String,
        filename: String,
        data: Vec<u8>,
    },
    PeerConnected {
        peer_id: PeerId,
        remote_addr: Option<String>,
    },
    PeerDisconnected {
        peer_id: PeerId,
    },
    /// Non-fatal problem worth showing, e.g. an undecodable message
    Diagnostic {
        peer_id: Option<PeerId>,
        message: String,
    },
}

impl MeshEvent {
    pub fn diagnostic<S: Into<String>>(peer_id: Option<PeerId>, message: S) -> Self {
        MeshEvent::Diagnostic {
            peer_id,
            message: message.into(),
        }
    }

    /// Peer the event originated from, if any
    pub fn peer_id(&self) -> Option<&PeerId> {
        match self {
            MeshEvent::Message { peer_id, .. }
            | MeshEvent::FileReceived { peer_id, .. }
            | MeshEvent::ProtectedFileReceived { peer_id, .. }
            | MeshEvent::PeerConnected { peer_id, .. }
            | MeshEvent::PeerDisconnected { peer_id } => Some(peer_id),
            MeshEvent::Diagnostic { peer_id, .. } => peer_id.as_ref(),
        }
    }
}

impl fmt::Display for MeshEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MeshEvent::Message { from, body, .. } => write!(f, "{}: {}", from, body),
            MeshEvent::FileReceived {
                from,
                filename,
                contents,
                ..
            } => write!(
                f,
                "[System] Received file '{}' from {} ({} bytes)",
                filename,
                from,
                contents.len()
            ),
            MeshEvent::ProtectedFileReceived { from, filename, .. } => write!(
                f,
                "[System] Received password-protected file '{}' from {}",
                filename, from
            ),
            MeshEvent::PeerConnected {
                peer_id,
                remote_addr: Some(addr),
            } => write!(f, "[System] Connection established with {} ({})", peer_id, addr),
            MeshEvent::PeerConnected { peer_id, .. } => {
                write!(f, "[System] Connection established with {}", peer_id)
            }
            MeshEvent::PeerDisconnected { peer_id } => {
                write!(f, "[System] Connection closed with {}", peer_id)
            }
            MeshEvent::Diagnostic { message, .. } => write!(f, "[System] {}", message),
        }
    }
}
