//! Guest error types.

use kvbridge_protocol::{ErrorCode, ProtocolError};
use kvbridge_store::StoreError;
use thiserror::Error;

/// Errors surfaced to database callers on the guest side.
#[derive(Debug, Error)]
pub enum GuestError {
    #[error("database is not open")]
    DatabaseNotOpen,

    #[error("connection to the host was lost")]
    ConnectionLost,

    #[error("reopening a closed database is not supported")]
    NotSupported,

    #[error("forward target does not support byte keys and values")]
    EncodingNotSupported,

    #[error("only a single rpc stream is supported")]
    RpcStream,

    #[error("host error: {code}")]
    Remote { code: String },

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GuestError {
    /// The stable error code string for this error.
    pub fn code(&self) -> &str {
        match self {
            GuestError::DatabaseNotOpen => ErrorCode::DatabaseNotOpen.as_str(),
            GuestError::ConnectionLost => ErrorCode::ConnectionLost.as_str(),
            GuestError::NotSupported => ErrorCode::NotSupported.as_str(),
            GuestError::EncodingNotSupported => ErrorCode::EncodingNotSupported.as_str(),
            GuestError::RpcStream => ErrorCode::RpcStream.as_str(),
            GuestError::Remote { code } => code,
            GuestError::Store(err) => err.code().as_str(),
            GuestError::Protocol(_) => "LEVEL_PROTOCOL_ERROR",
            GuestError::Io(_) => ErrorCode::IoError.as_str(),
        }
    }

    /// Builds the error for a known abort code.
    pub(crate) fn from_code(code: ErrorCode) -> Self {
        match code {
            ErrorCode::DatabaseNotOpen => GuestError::DatabaseNotOpen,
            ErrorCode::ConnectionLost => GuestError::ConnectionLost,
            ErrorCode::NotSupported => GuestError::NotSupported,
            ErrorCode::EncodingNotSupported => GuestError::EncodingNotSupported,
            ErrorCode::RpcStream => GuestError::RpcStream,
            other => GuestError::Remote {
                code: other.as_str().to_string(),
            },
        }
    }

    /// Maps a wire error code string onto a guest error.
    pub(crate) fn from_wire(code: String) -> Self {
        match ErrorCode::parse(&code) {
            Some(known) => GuestError::from_code(known),
            None => GuestError::Remote { code },
        }
    }
}
