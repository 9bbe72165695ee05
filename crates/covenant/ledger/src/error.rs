//! Error types for covenant-ledger

use thiserror::Error;

/// Storage-specific errors
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend could not be reached or opened
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement or request failed
    #[error("Query error: {0}")]
    Query(String),

    /// Stored data could not be decoded
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Remote service answered with an error
    #[error("Remote error: {0}")]
    Remote(String),
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, StorageError>;
