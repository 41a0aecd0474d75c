//! Error types for the import pipeline

use thiserror::Error;

/// Import errors
#[derive(Error, Debug)]
pub enum ImportError {
    /// Error from cumulus-core
    #[error("Core error: {0}")]
    Core(#[from] cumulus_core::Error),

    /// The run was cancelled through its token.
    ///
    /// Distinct from failure: already-persisted nodes remain valid, only
    /// the not-yet-linked intermediates of the aborted branch are dropped.
    #[error("Import cancelled")]
    Cancelled,

    /// A structural invariant was violated (programming error)
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A worker task failed to join
    #[error("Task join error: {0}")]
    Join(String),
}

impl ImportError {
    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        ImportError::InvariantViolation(msg.into())
    }

    /// Create an invalid configuration error
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        ImportError::InvalidConfig(msg.into())
    }
}

impl From<tokio::task::JoinError> for ImportError {
    fn from(e: tokio::task::JoinError) -> Self {
        ImportError::Join(e.to_string())
    }
}

/// Result type for import operations
pub type Result<T> = std::result::Result<T, ImportError>;
