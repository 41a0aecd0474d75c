//! Error types for cumulus-core

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type
#[derive(Error, Debug)]
pub enum Error {
    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found in the store
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid content id or store address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// JSON envelope error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Binary attribute codec error
    #[error("Codec error: {0}")]
    Codec(#[from] postcard::Error),

    /// Envelope or payload with an unrecognized kind tag
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A structural invariant of the octree was violated. Programming
    /// error; never swallowed.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(String),

    /// Generic error with message
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a not found error
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Create an invalid address error
    pub fn invalid_address(msg: impl Into<String>) -> Self {
        Error::InvalidAddress(msg.into())
    }

    /// Create an unsupported format error
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Error::UnsupportedFormat(msg.into())
    }

    /// Create an invariant violation error
    pub fn invariant(msg: impl Into<String>) -> Self {
        Error::InvariantViolation(msg.into())
    }

    /// Create an I/O error
    pub fn io(msg: impl Into<String>) -> Self {
        Error::Io(msg.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }
}
