//! Error types for change tracking.

use tessera_model::ModelError;
use thiserror::Error;

/// Result type for change operations.
pub type ChangeResult<T> = Result<T, ChangeError>;

/// Errors raised while recording, combining or applying changes.
#[derive(Debug, Error)]
pub enum ChangeError {
    /// Two entries for the same key cannot follow each other.
    #[error("invalid change sequence for {key} in {structure}: {reason}")]
    InvalidChangeSequence {
        structure: String,
        key: String,
        reason: String,
    },

    /// The target does not hold the data a change expects to replace.
    #[error("cannot apply change to {key} in {structure}: {reason}")]
    ApplyConflict {
        structure: String,
        key: String,
        reason: String,
    },

    /// A change set was combined with, or applied to, a structure of another type.
    #[error("change set type mismatch for {structure}")]
    TypeMismatch { structure: String },

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
