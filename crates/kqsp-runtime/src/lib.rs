//! KQSP Runtime Engine
//!
//! This crate contains the concurrent engine of the KQSP mesh, including:
//! - `MeshRuntime`: the orchestrator owning the listener, the tasks and the stop signal
//! - `PeerRegistry`: membership and group key, updated as one unit
//! - `ConnectionHandler`: one receive loop per peer
//! - `Broadcaster`: outbound fan-out with partial-failure recovery
//!
//! `kqsp-core` provides the wire format and types; this crate drives them
//! over real byte streams.

pub mod listener;
pub mod logic;
pub mod managers;
mod runtime;
pub mod transport;

pub use listener::ListenerService;
pub use logic::{BroadcastOutcome, Broadcaster, ConnectionHandler, HandlerExit};
pub use managers::{ConnectionId, PeerConnection, PeerInfo, PeerRegistry, PeerState};
pub use runtime::MeshRuntime;
pub use transport::{with_default_port, MeshStream, StreamConnector, TcpConnector};

// Re-export core types for convenience
pub use kqsp_core::{
    EventStream, GroupKey, LocalIdentity, MeshConfig, MeshError, MeshEvent, MeshResult, PeerId,
};
