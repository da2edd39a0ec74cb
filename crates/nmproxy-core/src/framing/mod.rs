//! Native messaging frame codec.
//!
//! Every message on the wire is a 4-byte little-endian `u32` length followed
//! by exactly that many payload bytes. There are no separators, no
//! terminators and no resynchronisation markers: a stream that is cut short
//! mid-frame cannot be recovered.

mod codec;
mod error;
mod frame;

pub use codec::{LENGTH_PREFIX_LEN, decode_frame, decode_frame_limited, encode_frame};
pub use error::{DecodeError, WriteError};
pub use frame::{Frame, UNKNOWN_MESSAGE_TYPE};
