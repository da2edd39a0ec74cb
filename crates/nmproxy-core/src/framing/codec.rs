//! Async encode/decode of length-prefixed frames.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::error::{DecodeError, WriteError};
use super::frame::Frame;

/// Size of the little-endian length prefix.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Decode one frame with no length limit beyond `u32::MAX`.
///
/// Returns `Ok(None)` when the stream ends cleanly before the first byte of
/// a length prefix.
pub async fn decode_frame<R>(reader: &mut R) -> Result<Option<Frame>, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    decode_frame_limited(reader, u32::MAX).await
}

/// Decode one frame, rejecting advertised lengths above `max_len`.
///
/// The limit is checked before the payload buffer is allocated.
pub async fn decode_frame_limited<R>(
    reader: &mut R,
    max_len: u32,
) -> Result<Option<Frame>, DecodeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_LEN];
    let received = read_until_full(reader, &mut prefix).await?;
    if received == 0 {
        return Ok(None);
    }
    if received < LENGTH_PREFIX_LEN {
        return Err(DecodeError::TruncatedHeader { received });
    }

    let length = u32::from_le_bytes(prefix);
    if length > max_len {
        return Err(DecodeError::Oversized {
            length,
            max: max_len,
        });
    }
    let Ok(size) = usize::try_from(length) else {
        return Err(DecodeError::Oversized {
            length,
            max: max_len,
        });
    };

    let mut payload = vec![0u8; size];
    let received = read_until_full(reader, &mut payload).await?;
    if received < size {
        return Err(DecodeError::TruncatedPayload {
            expected: length,
            received,
        });
    }

    Ok(Some(Frame::new(payload)))
}

/// Encode one frame: length prefix and payload in a single buffer, then flush.
pub async fn encode_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), WriteError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let Ok(length) = u32::try_from(frame.len()) else {
        return Err(WriteError::TooLarge { size: frame.len() });
    };

    let mut buf = Vec::with_capacity(frame.encoded_len());
    buf.extend_from_slice(&length.to_le_bytes());
    buf.extend_from_slice(frame.payload());

    let total = buf.len();
    let mut written = 0;
    while written < total {
        match writer.write(&buf[written..]).await {
            Ok(0) => {
                return Err(write_failure(
                    written,
                    total,
                    io::Error::from(io::ErrorKind::WriteZero),
                ));
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(write_failure(written, total, e)),
        }
    }

    writer.flush().await.map_err(WriteError::Io)
}

/// Read until `buf` is full or the stream ends; returns the bytes read.
async fn read_until_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

const fn write_failure(written: usize, total: usize, source: io::Error) -> WriteError {
    if written == 0 {
        WriteError::Io(source)
    } else {
        WriteError::Partial {
            written,
            total,
            source,
        }
    }
}
