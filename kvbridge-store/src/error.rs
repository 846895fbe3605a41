//! Store error types.

use kvbridge_protocol::ErrorCode;
use thiserror::Error;

/// Errors surfaced by a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt store data: {0}")]
    Corruption(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// The stable code placed in reply frames for this error.
    pub fn code(&self) -> ErrorCode {
        match self {
            StoreError::Io(_) => ErrorCode::IoError,
            StoreError::Corruption(_) => ErrorCode::Corruption,
            StoreError::Backend(_) => ErrorCode::Backend,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, "disk"));
        assert_eq!(err.code().as_str(), "LEVEL_IO_ERROR");
        assert_eq!(
            StoreError::Corruption("bad block".into()).code().as_str(),
            "LEVEL_CORRUPTION"
        );
        assert_eq!(
            StoreError::Backend("busy".into()).code().as_str(),
            "LEVEL_BACKEND_ERROR"
        );
    }
}
