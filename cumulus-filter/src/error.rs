//! Error types for the filter subsystem

use thiserror::Error;

/// Filter errors
#[derive(Error, Debug)]
pub enum FilterError {
    /// Error from cumulus-core
    #[error("Core error: {0}")]
    Core(#[from] cumulus_core::Error),

    /// A filter JSON value with an unrecognized type tag.
    ///
    /// The set of filter types is closed at build time; unknown tags are
    /// fatal, never silently skipped.
    #[error("Unsupported filter: {0}")]
    UnsupportedFilter(String),

    /// A filter JSON value with a known tag but invalid fields
    #[error("Invalid filter: {0}")]
    InvalidFilter(String),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FilterError {
    /// Create an unsupported filter error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        FilterError::UnsupportedFilter(msg.into())
    }

    /// Create an invalid filter error
    pub fn invalid(msg: impl Into<String>) -> Self {
        FilterError::InvalidFilter(msg.into())
    }

    /// Lower into the core error type (for `OctreeNode` trait impls, whose
    /// contract is the core `Result`).
    pub fn into_core(self) -> cumulus_core::Error {
        match self {
            FilterError::Core(e) => e,
            other => cumulus_core::Error::other(other.to_string()),
        }
    }
}

/// Result type for filter operations
pub type Result<T> = std::result::Result<T, FilterError>;
