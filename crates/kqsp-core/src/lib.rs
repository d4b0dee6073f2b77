//! KQSP Core Protocol Implementation
//!
//! This crate provides the foundational types, framing, envelopes, key
//! derivation and event plumbing for the KQSP peer-to-peer group chat mesh.
//! It performs no socket I/O of its own; readers and writers are generic over
//! tokio's async I/O traits so the runtime can plug in any byte stream.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod channel;
pub mod config;
pub mod errors;
pub mod protocol;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use channel::{create_event_channel, EventSink, EventStream, MeshEvent};
pub use config::{
    ChannelConfig, ListenConfig, MeshConfig, NetworkConfig, ProtocolConfig, DEFAULT_MAX_FRAME_LEN,
    DEFAULT_PORT,
};
pub use errors::{
    DecodeError, FrameError, HandshakeError, MeshError, MeshResult, Result, TransportError,
};
pub use protocol::{CipherEngine, Envelope, FrameCodec, GroupKey, GroupKeyDeriver, Message};
pub use types::{LocalIdentity, PeerId};
