//! Error types for the engine.

use tessera_changes::ChangeError;
use tessera_model::ModelError;
use tessera_storage::StorageError;
use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur while running commands, undoing, saving or loading.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Structural error from the model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Change tracking or change application failed.
    #[error(transparent)]
    Change(#[from] ChangeError),

    /// Repository error outside a save or load.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// The repository rejected a save. Nothing was truncated.
    #[error("save failed: {0}")]
    Save(#[source] StorageError),

    /// Reading or migrating the repository failed. The model is unchanged.
    #[error("load failed: {0}")]
    Load(#[source] StorageError),

    /// The repository accepted a save but the history repository did not.
    #[error("history append failed: {0}")]
    History(#[source] StorageError),

    /// A command was submitted without one of its parameters.
    #[error("command '{command}' is missing parameter '{parameter}'")]
    ParameterNotInitialized {
        command: String,
        parameter: &'static str,
    },

    /// The command observed its cancellation token.
    #[error("command cancelled")]
    Cancelled,

    /// The command body gave up.
    #[error("command aborted: {0}")]
    Aborted(String),

    /// The command body panicked.
    #[error("command '{0}' panicked")]
    Panicked(String),

    /// Unsupported snapshot feature combination.
    #[error("invalid snapshot features: {0}")]
    InvalidFeatures(String),

    /// The operation would touch history that a running save has captured.
    #[error("a save is in progress")]
    SaveInProgress,

    /// The command queue is at capacity.
    #[error("command queue is full")]
    QueueFull,

    /// The engine has shut down.
    #[error("engine is shut down")]
    Closed,

    /// The engine was started outside a tokio runtime.
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl EngineError {
    /// Shorthand for aborting a command body with a reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::Aborted(reason.into())
    }
}
