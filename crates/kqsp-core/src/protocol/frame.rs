//! Length-prefixed framing
//!
//! A frame is a 4-byte big-endian unsigned length followed by exactly that many
//! payload bytes. The length is bounded so a malicious peer cannot force an
//! unbounded allocation. Zero-length frames are valid and decode to an empty
//! payload; higher layers treat them as keepalives.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::DEFAULT_MAX_FRAME_LEN;
use crate::errors::FrameError;

/// Size of the length prefix
pub const LENGTH_PREFIX_SIZE: usize = 4;

// ----------------------------------------------------------------------------
// Frame Codec
// ----------------------------------------------------------------------------

/// Encoder/decoder for length-prefixed frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    max_frame_len: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LEN)
    }
}

impl FrameCodec {
    /// Create a codec that rejects payloads longer than `max_frame_len`
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            max_frame_len: max_frame_len.min(u32::MAX as usize),
        }
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    /// Prepend the 4-byte big-endian length to `payload`
    pub fn encode(&self, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
        self.check_len(payload.len())?;

        let mut frame = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        frame.extend_from_slice(payload);
        Ok(frame)
    }

    /// Read exactly one frame from `reader`
    ///
    /// Short reads keep reading until the frame is complete. If the stream ends
    /// first, `FrameError::IncompleteStream` reports how many bytes of the frame
    /// (prefix included) were received; zero means the remote closed between
    /// frames.
    pub async fn decode_stream<R>(&self, reader: &mut R) -> Result<Vec<u8>, FrameError>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let filled = read_full(reader, &mut prefix).await?;
        if filled < LENGTH_PREFIX_SIZE {
            return Err(FrameError::IncompleteStream {
                received: filled,
                expected: LENGTH_PREFIX_SIZE,
            });
        }

        let length = u32::from_be_bytes(prefix) as usize;
        self.check_len(length)?;

        let mut payload = vec![0u8; length];
        let filled = read_full(reader, &mut payload).await?;
        if filled < length {
            return Err(FrameError::IncompleteStream {
                received: LENGTH_PREFIX_SIZE + filled,
                expected: LENGTH_PREFIX_SIZE + length,
            });
        }

        Ok(payload)
    }

    /// Encode `payload` and write the whole frame, flushing afterwards
    pub async fn write_frame<W>(&self, writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let frame = self.encode(payload)?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    fn check_len(&self, length: usize) -> Result<(), FrameError> {
        if length > self.max_frame_len {
            return Err(FrameError::FrameTooLarge {
                length,
                max: self.max_frame_len,
            });
        }
        Ok(())
    }
}

/// Fill `buf` from `reader`, returning how many bytes were read before EOF
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> Result<usize, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
