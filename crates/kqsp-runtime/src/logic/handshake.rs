//! Hello exchange
//!
//! The connecting side sends `{"type":"hello","peer_id":..}` first; the
//! accepting side validates it and answers with its own hello before either
//! side registers the other. Both hellos are normally length-framed. An
//! inbound hello whose first byte is `{` is read as a raw, unframed JSON
//! object for interoperability with peers that never framed it.
//!
//! The reply is always required: the connector learns the remote peer id
//! from it, so an acceptor that never answers fails the connect with a
//! timeout even when our own hello was sent unframed.

use kqsp_core::{
    protocol::LENGTH_PREFIX_SIZE, Envelope, FrameCodec, FrameError, HandshakeError, PeerId,
    ProtocolConfig,
};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::debug;

/// Accepting side: read and validate the remote hello, then reply with ours
pub async fn accept<R, W>(
    reader: &mut R,
    writer: &mut W,
    self_id: &PeerId,
    config: &ProtocolConfig,
) -> Result<PeerId, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    with_timeout(config, async {
        let remote = read_hello(reader, self_id, config).await?;
        write_hello(writer, self_id, config, false).await?;
        Ok(remote)
    })
    .await
}

/// Connecting side: send our hello, then wait for the acceptor's reply
///
/// `legacy_raw_handshake` only changes how our hello is written.
pub async fn initiate<R, W>(
    reader: &mut R,
    writer: &mut W,
    self_id: &PeerId,
    config: &ProtocolConfig,
) -> Result<PeerId, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
    W: AsyncWrite + Unpin + ?Sized,
{
    with_timeout(config, async {
        write_hello(writer, self_id, config, config.legacy_raw_handshake).await?;
        read_hello(reader, self_id, config).await
    })
    .await
}

async fn with_timeout<F>(config: &ProtocolConfig, exchange: F) -> Result<PeerId, HandshakeError>
where
    F: std::future::Future<Output = Result<PeerId, HandshakeError>>,
{
    tokio::time::timeout(config.handshake_timeout(), exchange)
        .await
        .map_err(|_| HandshakeError::Timeout {
            timeout_ms: config.handshake_timeout_ms,
        })?
}

async fn write_hello<W>(
    writer: &mut W,
    self_id: &PeerId,
    config: &ProtocolConfig,
    raw: bool,
) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let payload = Envelope::hello(self_id.clone()).encode()?;
    if raw {
        writer.write_all(&payload).await?;
        writer.flush().await?;
    } else {
        handshake_codec(config).write_frame(writer, &payload).await?;
    }
    Ok(())
}

async fn read_hello<R>(
    reader: &mut R,
    self_id: &PeerId,
    config: &ProtocolConfig,
) -> Result<PeerId, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut first = [0u8; 1];
    if reader.read(&mut first).await? == 0 {
        return Err(FrameError::IncompleteStream {
            received: 0,
            expected: LENGTH_PREFIX_SIZE,
        }
        .into());
    }

    let payload = if first[0] == b'{' {
        debug!("Reading unframed hello");
        read_raw_object(reader, first[0], config.max_handshake_len).await?
    } else {
        let mut rest = (&first[..]).chain(reader);
        handshake_codec(config).decode_stream(&mut rest).await?
    };

    match Envelope::decode(&payload)? {
        Envelope::Hello { peer_id } if peer_id.is_empty() => Err(HandshakeError::EmptyPeerId),
        Envelope::Hello { peer_id } if &peer_id == self_id => Err(HandshakeError::SelfConnection {
            peer_id: peer_id.to_string(),
        }),
        Envelope::Hello { peer_id } => Ok(peer_id),
        other => Err(HandshakeError::UnexpectedMessage {
            kind: other.kind().to_string(),
        }),
    }
}

fn handshake_codec(config: &ProtocolConfig) -> FrameCodec {
    FrameCodec::new(config.max_handshake_len.min(config.max_frame_len))
}

/// Read one JSON object byte by byte until its braces balance
async fn read_raw_object<R>(
    reader: &mut R,
    first: u8,
    max_len: usize,
) -> Result<Vec<u8>, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = vec![first];
    let mut scanner = ObjectScanner::default();
    scanner.feed(first);

    while !scanner.is_complete() {
        if buf.len() >= max_len {
            return Err(HandshakeError::RawHelloTooLarge { max: max_len });
        }
        let mut byte = [0u8; 1];
        if reader.read(&mut byte).await? == 0 {
            return Err(FrameError::IncompleteStream {
                received: buf.len(),
                expected: buf.len() + 1,
            }
            .into());
        }
        buf.push(byte[0]);
        scanner.feed(byte[0]);
    }
    Ok(buf)
}

/// Tracks brace depth outside of JSON strings
#[derive(Debug, Default)]
struct ObjectScanner {
    depth: usize,
    in_string: bool,
    escaped: bool,
    started: bool,
}

impl ObjectScanner {
    fn feed(&mut self, byte: u8) {
        if self.in_string {
            match byte {
                _ if self.escaped => self.escaped = false,
                b'\\' => self.escaped = true,
                b'"' => self.in_string = false,
                _ => {}
            }
            return;
        }
        match byte {
            b'"' => self.in_string = true,
            b'{' => {
                self.depth += 1;
                self.started = true;
            }
            b'}' => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
    }

    fn is_complete(&self) -> bool {
        self.started && self.depth == 0
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
