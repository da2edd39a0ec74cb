//! Frame codec error types.

use std::io;

/// Errors returned while decoding a frame.
///
/// A clean end of stream is not an error: [`super::decode_frame`] reports it
/// as `Ok(None)`.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The stream ended after part of the length prefix was read.
    #[error("Stream truncated inside length prefix ({received} of 4 bytes)")]
    TruncatedHeader { received: usize },

    /// The stream ended before the advertised payload was complete.
    #[error("Stream truncated inside payload ({received} of {expected} bytes)")]
    TruncatedPayload { expected: u32, received: usize },

    /// The advertised length is larger than the caller's limit.
    #[error("Frame length {length} exceeds limit of {max} bytes")]
    Oversized { length: u32, max: u32 },

    /// Underlying read failure.
    #[error("Read failed: {0}")]
    Io(#[from] io::Error),
}

impl DecodeError {
    /// Whether the stream was cut short mid-frame.
    pub const fn is_truncated(&self) -> bool {
        matches!(
            self,
            Self::TruncatedHeader { .. } | Self::TruncatedPayload { .. }
        )
    }

    /// Short machine-readable label for telemetry.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::TruncatedHeader { .. } | Self::TruncatedPayload { .. } => "truncated_stream",
            Self::Oversized { .. } => "oversized_frame",
            Self::Io(_) => "read_error",
        }
    }
}

/// Errors returned while encoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum WriteError {
    /// Some bytes of the frame were accepted before the write failed.
    #[error("Partial write ({written} of {total} bytes): {source}")]
    Partial {
        written: usize,
        total: usize,
        #[source]
        source: io::Error,
    },

    /// Nothing was written, or the final flush failed.
    #[error("Write failed: {0}")]
    Io(#[source] io::Error),

    /// The payload cannot be described by a `u32` length prefix.
    #[error("Payload of {size} bytes does not fit a 32-bit length prefix")]
    TooLarge { size: usize },
}

impl WriteError {
    /// Short machine-readable label for telemetry.
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Partial { .. } => "partial_write",
            Self::Io(_) => "write_error",
            Self::TooLarge { .. } => "oversized_frame",
        }
    }
}
