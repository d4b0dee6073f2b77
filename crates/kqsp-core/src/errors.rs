//! Error types for the KQSP protocol
//!
//! This module contains all error types used throughout the KQSP core protocol:
//! framing errors, handshake errors, envelope decoding errors and transport errors,
//! plus the `MeshError` type that unifies them.
//!
//! Recovery policy: everything scoped to one peer connection is isolated and
//! non-fatal to the rest of the mesh. Only resource acquisition at startup
//! (binding the listener) is fatal.

use thiserror::Error;

// ----------------------------------------------------------------------------
// Specific Error Types
// ----------------------------------------------------------------------------

/// Errors raised while reading or writing length-prefixed frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The stream ended before a full frame was read. `received == 0` means the
    /// remote closed cleanly on a frame boundary.
    #[error("Incomplete stream: received {received} of {expected} bytes")]
    IncompleteStream { received: usize, expected: usize },
    #[error("Frame length {length} exceeds maximum {max}")]
    FrameTooLarge { length: usize, max: usize },
    #[error("Frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// True when the remote closed the stream between frames
    pub fn is_graceful_close(&self) -> bool {
        matches!(self, FrameError::IncompleteStream { received: 0, .. })
    }
}

/// Errors raised while decoding an envelope or decrypting its payload
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Invalid envelope JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Envelope is missing field '{field}'")]
    MissingField { field: &'static str },
    #[error("Byte string contains non latin-1 character U+{code_point:04X}")]
    InvalidLatin1 { code_point: u32 },
    #[error("Decrypted payload is not valid UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Errors raised while exchanging the one-shot `hello`
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("Handshake frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Malformed hello: {0}")]
    Malformed(#[from] DecodeError),
    #[error("Expected hello, got '{kind}'")]
    UnexpectedMessage { kind: String },
    #[error("Hello carried an empty peer id")]
    EmptyPeerId,
    #[error("Remote claimed our own peer id {peer_id}")]
    SelfConnection { peer_id: String },
    #[error("Raw hello exceeds {max} bytes")]
    RawHelloTooLarge { max: usize },
    #[error("Handshake timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("Handshake I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Transport level errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Failed to connect to {addr}: {reason}")]
    ConnectFailed { addr: String, reason: String },
    #[error("Connection to {addr} timed out after {timeout_ms}ms")]
    ConnectTimeout { addr: String, timeout_ms: u64 },
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
    #[error("Network I/O error: {0}")]
    NetworkIo(#[from] std::io::Error),
}

// ----------------------------------------------------------------------------
// Mesh Error
// ----------------------------------------------------------------------------

/// Core error type for the KQSP mesh
#[derive(Debug, Error)]
pub enum MeshError {
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeError),
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Invalid peer identifier: {0}")]
    InvalidIdentity(String),
    #[error("Configuration error: {reason}")]
    Configuration { reason: String },
    #[error("Runtime is already running")]
    AlreadyRunning,
    #[error("Runtime is not running")]
    NotRunning,
}

// ----------------------------------------------------------------------------
// Convenience Error Constructors
// ----------------------------------------------------------------------------

impl MeshError {
    /// Create a configuration error with a reason
    pub fn config_error<T: Into<String>>(reason: T) -> Self {
        MeshError::Configuration {
            reason: reason.into(),
        }
    }

    /// Create a bind error; fatal to the service
    pub fn bind_failed<A: Into<String>, R: Into<String>>(addr: A, reason: R) -> Self {
        MeshError::Transport(TransportError::Bind {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    /// Create a connect failure for an outbound dial
    pub fn connect_failed<A: Into<String>, R: Into<String>>(addr: A, reason: R) -> Self {
        MeshError::Transport(TransportError::ConnectFailed {
            addr: addr.into(),
            reason: reason.into(),
        })
    }

    /// Whether this error must stop the whole service
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            MeshError::Transport(TransportError::Bind { .. }) | MeshError::Configuration { .. }
        )
    }
}

// ----------------------------------------------------------------------------
// Type Aliases
// ----------------------------------------------------------------------------

pub type Result<T> = core::result::Result<T, MeshError>;
pub type MeshResult<T> = Result<T>;

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
