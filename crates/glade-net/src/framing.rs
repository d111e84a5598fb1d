//! Length-prefixed framing for TCP streams.
//!
//! Each frame is a little-endian `u32` byte count followed by that many
//! payload bytes. The count excludes its own four bytes, and zero-length
//! frames are legal.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::envelope::{self, EnvelopeError};

/// Size limits applied to every frame read or written.
#[derive(Debug, Clone)]
pub struct FrameLimits {
    /// Largest payload accepted, in bytes. Default: 1 MiB.
    pub max_payload: u32,
}

impl Default for FrameLimits {
    fn default() -> Self {
        Self {
            max_payload: 1_048_576,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// A frame declared or carried more bytes than the limit allows.
    #[error("frame of {size} bytes is over the {max} byte limit")]
    PayloadTooLarge {
        /// Bytes in the offending frame.
        size: usize,
        /// Configured limit.
        max: u32,
    },

    /// The peer closed the connection mid-frame or between frames.
    #[error("connection closed")]
    ConnectionClosed,

    /// The frame arrived but its envelope did not decode.
    #[error("bad envelope: {0}")]
    Envelope(#[from] EnvelopeError),

    /// Reading or writing the socket failed for another reason.
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
}

fn closed_or_io(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read a single length-prefixed frame and return its payload.
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    limits: &FrameLimits,
) -> Result<Vec<u8>, FrameError> {
    let mut prefix = [0u8; 4];
    reader.read_exact(&mut prefix).await.map_err(closed_or_io)?;

    let payload_len = u32::from_le_bytes(prefix);
    if payload_len > limits.max_payload {
        return Err(FrameError::PayloadTooLarge {
            size: payload_len as usize,
            max: limits.max_payload,
        });
    }

    let mut payload = vec![0u8; payload_len as usize];
    reader.read_exact(&mut payload).await.map_err(closed_or_io)?;
    Ok(payload)
}

/// Write `payload` as a single length-prefixed frame and flush.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    limits: &FrameLimits,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= limits.max_payload)
        .ok_or(FrameError::PayloadTooLarge {
            size: payload.len(),
            max: limits.max_payload,
        })?;

    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encode `message` into an envelope and write it as one frame.
pub async fn write_message<W, T>(
    writer: &mut W,
    message: &T,
    limits: &FrameLimits,
) -> Result<(), FrameError>
where
    W: AsyncWriteExt + Unpin,
    T: Serialize,
{
    let bytes = envelope::encode(message)?;
    write_frame(writer, &bytes, limits).await
}

/// Read one frame and decode its envelope as `T`.
pub async fn read_message<R, T>(reader: &mut R, limits: &FrameLimits) -> Result<T, FrameError>
where
    R: AsyncReadExt + Unpin,
    T: DeserializeOwned,
{
    let bytes = read_frame(reader, limits).await?;
    Ok(envelope::decode(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_stay_separate() {
        let (mut client, mut server) = duplex(8192);
        let limits = FrameLimits::default();

        write_frame(&mut client, b"move", &limits).await.unwrap();
        write_frame(&mut client, b"", &limits).await.unwrap();
        write_frame(&mut client, b"chat", &limits).await.unwrap();

        assert_eq!(read_frame(&mut server, &limits).await.unwrap(), b"move");
        assert!(read_frame(&mut server, &limits).await.unwrap().is_empty());
        assert_eq!(read_frame(&mut server, &limits).await.unwrap(), b"chat");
    }

    #[tokio::test]
    async fn test_partial_reads_reassemble() {
        let (mut client, mut server) = duplex(8);
        let limits = FrameLimits::default();
        let payload = b"a payload much longer than the eight byte pipe";

        let writer_limits = limits.clone();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, payload, &writer_limits).await.unwrap();
        });

        let received = read_frame(&mut server, &limits).await.unwrap();
        writer.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (mut client, mut server) = duplex(8192);
        let limits = FrameLimits {
            max_payload: 16,
        };

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &limits).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { size: 1024, .. })));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (mut client, _server) = duplex(8192);
        let limits = FrameLimits {
            max_payload: 16,
        };
        let result = write_frame(&mut client, &[0u8; 64], &limits).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_closed_peer_detected() {
        let (client, mut server) = duplex(8192);
        drop(client);
        let result = read_frame(&mut server, &FrameLimits::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_typed_message_over_frame() {
        let (mut client, mut server) = duplex(8192);
        let limits = FrameLimits::default();

        write_message(&mut client, &("ada".to_string(), 10.5f64), &limits)
            .await
            .unwrap();
        let (name, x): (String, f64) = read_message(&mut server, &limits).await.unwrap();
        assert_eq!(name, "ada");
        assert_eq!(x, 10.5);
    }
}
