//! Error types for approute core.

use thiserror::Error;

/// Core error type for approute policy values.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(String),

    #[error("Invalid blacklist entry: {0:?}")]
    InvalidBlacklistEntry(String),
}

/// Result type alias for approute core operations.
pub type Result<T> = std::result::Result<T, Error>;
