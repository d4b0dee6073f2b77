//! Byte stream transports
//!
//! The mesh only needs an ordered, reliable byte stream per peer. TCP is the
//! default; anything else that can hand over a read half and a write half
//! (an in-memory pipe in tests, a tunnel negotiated elsewhere) plugs in
//! through `StreamConnector` or `MeshRuntime::connect_stream`.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use kqsp_core::{TransportError, DEFAULT_PORT};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tracing::debug;

use crate::managers::{BoxedReader, BoxedWriter};

// ----------------------------------------------------------------------------
// Mesh Stream
// ----------------------------------------------------------------------------

/// An established byte stream, split into its two halves
pub struct MeshStream {
    pub reader: BoxedReader,
    pub writer: BoxedWriter,
    pub remote_addr: Option<String>,
}

impl MeshStream {
    pub fn from_halves(
        reader: BoxedReader,
        writer: BoxedWriter,
        remote_addr: Option<String>,
    ) -> Self {
        Self {
            reader,
            writer,
            remote_addr,
        }
    }

    /// Split any bidirectional stream
    pub fn from_stream<S>(stream: S, remote_addr: Option<String>) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self::from_halves(Box::new(reader), Box::new(writer), remote_addr)
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok().map(|addr| addr.to_string());
        if let Err(e) = stream.set_nodelay(true) {
            debug!("Could not set TCP_NODELAY: {}", e);
        }
        let (reader, writer) = stream.into_split();
        Self::from_halves(Box::new(reader), Box::new(writer), remote_addr)
    }
}

// ----------------------------------------------------------------------------
// Connectors
// ----------------------------------------------------------------------------

/// Opens outbound streams to a peer address
#[async_trait]
pub trait StreamConnector: Send + Sync {
    async fn connect(&self, addr: &str) -> Result<MeshStream, TransportError>;
}

/// Plain TCP with a connect timeout
#[derive(Debug, Clone)]
pub struct TcpConnector {
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl StreamConnector for TcpConnector {
    async fn connect(&self, addr: &str) -> Result<MeshStream, TransportError> {
        let stream = tokio::time::timeout(self.timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| TransportError::ConnectTimeout {
                addr: addr.to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| TransportError::ConnectFailed {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?;
        Ok(MeshStream::from_tcp(stream))
    }
}

/// Append the default port to an address that does not name one
///
/// Accepts `host`, `host:port`, `a.b.c.d`, bare IPv6 and `[v6]:port`.
pub fn with_default_port(addr: &str) -> String {
    let addr = addr.trim();
    if addr.parse::<SocketAddr>().is_ok() {
        return addr.to_string();
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') && port.parse::<u16>().is_ok() => {
            addr.to_string()
        }
        _ if addr.contains(':') && !addr.starts_with('[') => format!("[{}]:{}", addr, DEFAULT_PORT),
        _ => format!("{}:{}", addr, DEFAULT_PORT),
    }
}
