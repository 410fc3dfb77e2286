//! Error types for the initiative lifecycle engine

use thiserror::Error;

/// Main error type for all engine operations
#[derive(Error, Debug)]
pub enum OpexError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Sequence allocation failed: {0}")]
    AllocationFailure(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),
}

impl OpexError {
    /// Transient failures the caller may retry as a whole
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::AllocationFailure(_) | Self::Conflict(_) | Self::Timeout(_) | Self::Storage(_) | Self::Io(_)
        )
    }
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, OpexError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OpexError::AllocationFailure("disk".into()).is_retryable());
        assert!(OpexError::Conflict("raced".into()).is_retryable());
        assert!(OpexError::Timeout("slow".into()).is_retryable());
        assert!(OpexError::Storage("disk full".into()).is_retryable());
        assert!(!OpexError::InvalidState("done".into()).is_retryable());
        assert!(!OpexError::Unauthorized("nope".into()).is_retryable());
    }
}
