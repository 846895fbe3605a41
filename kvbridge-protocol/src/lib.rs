//! # kvbridge-protocol
//!
//! Wire protocol for kvbridge: an ordered key/value store operated over a
//! duplex byte stream.
//!
//! This crate provides:
//! - Varint length-prefixed framing with incremental decode
//! - Tagged input/output message unions and their binary codecs
//! - Range and iterator option types shared by both peers
//! - Protocol errors and the stable caller-visible error codes

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;
pub mod varint;

pub use codec::Decoder;
pub use error::{ErrorCode, ProtocolError};
pub use frame::DEFAULT_MAX_FRAME_SIZE;
pub use message::{BatchOp, Input, IteratorOptions, Output, RangeOptions};

/// Default port for a kvbridge host server.
pub const DEFAULT_PORT: u16 = 7517;
