//! Host error types.

use kvbridge_protocol::ProtocolError;
use thiserror::Error;

/// Errors that terminate a host session or the server.
#[derive(Debug, Error)]
pub enum HostError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}
