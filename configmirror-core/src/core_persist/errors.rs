/*
    errors.rs - Error types for snapshot persistence
*/

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistError {
    /// Storage I/O error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Persisted file exists but cannot be decoded
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

/// Result type for persistence operations
pub type PersistResult<T> = Result<T, PersistError>;

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        PersistError::Storage(err.to_string())
    }
}
