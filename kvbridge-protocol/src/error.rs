//! Protocol error types and stable error codes.

use std::fmt;
use thiserror::Error;

/// Errors raised while framing or decoding messages.
///
/// Only [`ProtocolError::FrameTooLarge`] and [`ProtocolError::VarintOverflow`]
/// on the length prefix are fatal to the transport; payload-level failures
/// cause the offending frame to be dropped and the stream continues.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("varint overflow")]
    VarintOverflow,

    #[error("payload ended mid-field")]
    Truncated,

    #[error("unknown message tag: {0}")]
    UnknownTag(u8),

    #[error("invalid {field} value: {value}")]
    InvalidEnum { field: &'static str, value: u8 },

    #[error("{0} out of range")]
    OutOfRange(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Stable error codes surfaced to database callers.
///
/// The string forms are part of the protocol contract: hosts place them in
/// reply frames and guests compare against them, so they must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Operation on a closed database.
    DatabaseNotOpen,
    /// Transport disconnected without retry enabled.
    ConnectionLost,
    /// Reopening after close.
    NotSupported,
    /// Forward target lacks byte-buffer encoding.
    EncodingNotSupported,
    /// A second rpc stream was attached.
    RpcStream,
    /// Backing store I/O failure.
    IoError,
    /// Backing store detected corrupt data.
    Corruption,
    /// Other backing store failure.
    Backend,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::DatabaseNotOpen => "LEVEL_DATABASE_NOT_OPEN",
            ErrorCode::ConnectionLost => "LEVEL_CONNECTION_LOST",
            ErrorCode::NotSupported => "LEVEL_NOT_SUPPORTED",
            ErrorCode::EncodingNotSupported => "LEVEL_ENCODING_NOT_SUPPORTED",
            ErrorCode::RpcStream => "LEVEL_RPC_STREAM",
            ErrorCode::IoError => "LEVEL_IO_ERROR",
            ErrorCode::Corruption => "LEVEL_CORRUPTION",
            ErrorCode::Backend => "LEVEL_BACKEND_ERROR",
        }
    }

    /// Parses a wire code string back into a known code.
    pub fn parse(code: &str) -> Option<Self> {
        match code {
            "LEVEL_DATABASE_NOT_OPEN" => Some(ErrorCode::DatabaseNotOpen),
            "LEVEL_CONNECTION_LOST" => Some(ErrorCode::ConnectionLost),
            "LEVEL_NOT_SUPPORTED" => Some(ErrorCode::NotSupported),
            "LEVEL_ENCODING_NOT_SUPPORTED" => Some(ErrorCode::EncodingNotSupported),
            "LEVEL_RPC_STREAM" => Some(ErrorCode::RpcStream),
            "LEVEL_IO_ERROR" => Some(ErrorCode::IoError),
            "LEVEL_CORRUPTION" => Some(ErrorCode::Corruption),
            "LEVEL_BACKEND_ERROR" => Some(ErrorCode::Backend),
            _ => None,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
