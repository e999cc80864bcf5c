//! Shared error types for kadlite.

use thiserror::Error;

/// Top-level error type for kadlite domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KadliteError {
    /// A peer record could not be built or accepted.
    #[error("Invalid peer: {0}")]
    InvalidPeer(String),

    /// A configuration value is out of range or unusable.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Alias for kadlite results.
pub type KadliteResult<T> = Result<T, KadliteError>;
