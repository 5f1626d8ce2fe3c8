//! The wire framing used on every TCP connection: a 4-byte big-endian length
//! prefix followed by a NUL-terminated opaque payload.
//!
//! ```text
//! byte 0..3  : uint32 big-endian   L   (total frame size, including these 4 bytes)
//! byte 4..L-1: payload               (L-4 bytes; last byte is 0x00)
//! ```

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Length-field size, in bytes.
pub const LEN_FIELD_SIZE: u32 = 4;

/// Smallest legal frame: 4-byte length field + a single NUL terminator.
pub const MIN_FRAME_LEN: u32 = 5;

/// Default cap on `L`, per spec.
pub const DEFAULT_MAX_FRAME_LEN: u32 = 65_536;

/// Errors the frame codec can report.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("connection closed")]
    ConnectionClosed,
    #[error("connection truncated mid-frame")]
    Truncated,
    #[error("frame too large: {len} bytes (max {max})")]
    FrameTooLarge { len: u32, max: u32 },
    #[error("frame too small: {len} bytes (min {min})")]
    FrameTooSmall { len: u32, min: u32 },
    #[error("payload contains an embedded NUL byte")]
    EmbeddedNul,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Encode `payload` as a complete frame: `4 + len(payload) + 1` bytes.
///
/// The payload must not itself contain a NUL byte — NUL is reserved as the
/// frame terminator.
pub fn encode(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.contains(&0) {
        return Err(FrameError::EmbeddedNul);
    }
    let data_len = payload.len() as u32 + 1; // + terminator
    let frame_len = LEN_FIELD_SIZE + data_len;
    let mut buf = Vec::with_capacity(frame_len as usize);
    buf.extend_from_slice(&frame_len.to_be_bytes());
    buf.extend_from_slice(payload);
    buf.push(0);
    Ok(buf)
}

/// Write a complete frame to `writer`, looping until every byte is accepted
/// (a short write from the transport is progress, not an error).
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    payload: &[u8],
) -> Result<(), FrameError> {
    let frame = encode(payload)?;
    writer.write_all(&frame).await?;
    Ok(())
}

/// Decode exactly one frame from `reader`, returning its payload with the
/// NUL terminator stripped.
///
/// Reads exactly `L - 4` payload bytes via `read_exact`, so fragmented
/// delivery (the transport handing back fewer bytes than requested on any
/// given call) is handled transparently: a frame's bytes always arrive
/// whole regardless of how the underlying transport chops them up.
pub async fn decode<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_frame_len: u32,
) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; LEN_FIELD_SIZE as usize];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::ConnectionClosed);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }
    let frame_len = u32::from_be_bytes(len_buf);

    if frame_len < MIN_FRAME_LEN {
        return Err(FrameError::FrameTooSmall {
            len: frame_len,
            min: MIN_FRAME_LEN,
        });
    }
    if frame_len > max_frame_len {
        return Err(FrameError::FrameTooLarge {
            len: frame_len,
            max: max_frame_len,
        });
    }

    let data_len = (frame_len - LEN_FIELD_SIZE) as usize;
    let mut data = vec![0u8; data_len];
    match reader.read_exact(&mut data).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(FrameError::Truncated);
        }
        Err(e) => return Err(FrameError::Io(e)),
    }

    // Strip the terminating NUL the encoder appended; a well-formed frame
    // always ends with exactly one.
    data.pop();
    Ok(data)
}
