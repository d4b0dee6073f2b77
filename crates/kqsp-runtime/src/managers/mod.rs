//! Membership and connection management

pub mod connection;
pub mod registry;

pub use connection::{BoxedReader, BoxedWriter, ConnectionId, PeerConnection, PeerState};
pub use registry::{Membership, PeerInfo, PeerRegistry};
