//! Multipart frame encoding.
//!
//! Wire layout per message: `u8` frame count, then per frame a `u32`
//! big-endian length and that many bytes. The frame count is validated
//! before any payload is read, so a malformed message is detectable
//! without parsing fields.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{TransportError, MAX_FRAMES, MAX_FRAME_LEN};

/// Writes one multipart message.
pub async fn write_frames<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frames: &[Vec<u8>],
) -> Result<(), TransportError> {
    if frames.is_empty() || frames.len() > MAX_FRAMES as usize {
        return Err(TransportError::Protocol {
            reason: format!("outbound message has {} frames", frames.len()),
        });
    }
    for frame in frames {
        if frame.len() > MAX_FRAME_LEN as usize {
            return Err(TransportError::Protocol {
                reason: format!("outbound frame of {} bytes exceeds limit", frame.len()),
            });
        }
    }

    writer.write_u8(frames.len() as u8).await?;
    for frame in frames {
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

/// Reads one multipart message. Returns `Ok(None)` on a clean close
/// (EOF before the first byte of a message).
pub async fn read_frames<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<Option<Vec<Vec<u8>>>, TransportError> {
    let mut count_buf = [0u8; 1];
    if reader.read(&mut count_buf).await? == 0 {
        return Ok(None);
    }
    let count = count_buf[0];
    if count == 0 || count > MAX_FRAMES {
        return Err(TransportError::Protocol {
            reason: format!("inbound message declares {} frames", count),
        });
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(TransportError::Protocol {
                reason: format!("inbound frame of {} bytes exceeds limit", len),
            });
        }
        let mut frame = vec![0u8; len as usize];
        reader.read_exact(&mut frame).await?;
        frames.push(frame);
    }
    Ok(Some(frames))
}
