//! Error types for the storage layer.

use tessera_types::ChangeId;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Failure reported by the storage backend.
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Row or structure not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// Stored or submitted data is inconsistent.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// A history record was appended with an id not above the last one.
    #[error("history record {got} does not follow {last}")]
    OutOfOrder { last: ChangeId, got: ChangeId },
}
