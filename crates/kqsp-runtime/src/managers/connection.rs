//! Live peer connections
//!
//! A `PeerConnection` owns the write half of a peer's byte stream. The read
//! half belongs to that peer's `ConnectionHandler`. Clones share the same
//! underlying stream, so the registry, the handler and the broadcaster all see
//! one connection state.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{watch, Mutex};
use tracing::trace;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

// ----------------------------------------------------------------------------
// Identifiers and State
// ----------------------------------------------------------------------------

/// Process-unique id of one physical connection
///
/// Distinguishes a replaced connection from its replacement when both were
/// registered under the same `PeerId`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Lifecycle of a peer connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Connecting,
    Connected,
    Closing,
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerState::Connecting => write!(f, "connecting"),
            PeerState::Connected => write!(f, "open"),
            PeerState::Closing => write!(f, "closing"),
        }
    }
}

// ----------------------------------------------------------------------------
// Peer Connection
// ----------------------------------------------------------------------------

struct ConnectionInner {
    id: ConnectionId,
    remote_addr: Option<String>,
    writer: Mutex<Option<BoxedWriter>>,
    state: watch::Sender<PeerState>,
}

/// Shared handle to the write side of one peer connection
#[derive(Clone)]
pub struct PeerConnection {
    inner: Arc<ConnectionInner>,
}

impl PeerConnection {
    pub fn new(writer: BoxedWriter, remote_addr: Option<String>) -> Self {
        let (state, _) = watch::channel(PeerState::Connecting);
        Self {
            inner: Arc::new(ConnectionInner {
                id: ConnectionId::next(),
                remote_addr,
                writer: Mutex::new(Some(writer)),
                state,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.id
    }

    pub fn remote_addr(&self) -> Option<&str> {
        self.inner.remote_addr.as_deref()
    }

    pub fn state(&self) -> PeerState {
        *self.inner.state.borrow()
    }

    pub fn is_closing(&self) -> bool {
        self.state() == PeerState::Closing
    }

    /// Handshake finished; a closing connection stays closing
    pub fn mark_connected(&self) {
        self.inner.state.send_if_modified(|state| {
            if *state == PeerState::Connecting {
                *state = PeerState::Connected;
                true
            } else {
                false
            }
        });
    }

    /// Write one complete frame and flush it
    pub async fn send_frame(&self, frame: &[u8]) -> io::Result<()> {
        let mut guard = self.inner.writer.lock().await;
        let writer = match guard.as_mut() {
            Some(writer) if !self.is_closing() => writer,
            _ => return Err(io::Error::new(io::ErrorKind::NotConnected, "connection closed")),
        };

        writer.write_all(frame).await?;
        writer.flush().await?;

        // close() raced with this write and could not take the writer
        if self.is_closing() {
            guard.take();
        }
        Ok(())
    }

    /// Close the connection; idempotent
    ///
    /// Marks the connection as closing, which wakes the handler blocked on
    /// its read half, then shuts down the write half unless a send currently
    /// holds it.
    pub async fn close(&self) {
        let was_closing = self.inner.state.send_replace(PeerState::Closing) == PeerState::Closing;
        if was_closing {
            return;
        }

        if let Ok(mut guard) = self.inner.writer.try_lock() {
            if let Some(mut writer) = guard.take() {
                if let Err(e) = writer.shutdown().await {
                    trace!("Shutdown of {} failed: {}", self.id(), e);
                }
            }
        }
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        let mut state = self.inner.state.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = state.wait_for(|s| *s == PeerState::Closing).await;
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("id", &self.id())
            .field("remote_addr", &self.inner.remote_addr)
            .field("state", &self.state())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
