/*
    errors.rs - Error types for the replica subsystem
*/

use thiserror::Error;

/// Errors that can occur while touching the replica
#[derive(Debug, Error)]
pub enum ReplicaError {
    /// A thread panicked while holding the replica lock
    #[error("Lock poisoned: {0}")]
    LockPoisoned(String),
}

/// Result type for replica operations
pub type ReplicaResult<T> = Result<T, ReplicaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_replica_error_display() {
        let err = ReplicaError::LockPoisoned("replica".to_string());
        assert_eq!(err.to_string(), "Lock poisoned: replica");
    }
}
