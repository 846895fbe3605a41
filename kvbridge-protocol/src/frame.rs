//! Length-prefixed framing.
//!
//! Frame layout:
//!
//! ```text
//! +----------------+-------+------------------+
//! | length: varint | tag   | payload          |
//! |                | 1 byte| length - 1 bytes |
//! +----------------+-------+------------------+
//! ```
//!
//! The length covers the tag byte plus the payload. The decoder tolerates
//! arbitrary chunk boundaries and yields each complete frame exactly once.

use crate::error::ProtocolError;
use crate::varint;
use bytes::{Buf, Bytes, BytesMut};

/// Default upper bound on a single frame (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Wraps a tag + payload body into a length-prefixed frame.
pub fn encode(body: &[u8]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(varint::MAX_VARINT_LEN + body.len());
    varint::put_uvarint(&mut buf, body.len() as u64);
    buf.extend_from_slice(body);
    buf
}

/// Decodes the next frame body from `buf`.
///
/// Returns `Ok(Some(body))` if a complete frame was buffered, `Ok(None)` if
/// more data is needed. A frame longer than `max_frame_size` fails the
/// transport with [`ProtocolError::FrameTooLarge`].
pub fn decode(buf: &mut BytesMut, max_frame_size: usize) -> Result<Option<Bytes>, ProtocolError> {
    let (length, header_len) = match varint::peek_uvarint(buf)? {
        Some(decoded) => decoded,
        None => return Ok(None),
    };

    let length = length as usize;
    if length > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    if buf.len() < header_len + length {
        return Ok(None);
    }

    buf.advance(header_len);
    Ok(Some(buf.split_to(length).freeze()))
}
