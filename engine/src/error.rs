//! Error types for the Tempo engine.

use thiserror::Error;

/// All possible errors from the Tempo engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("invalid date key: {0}")]
    InvalidDateKey(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
