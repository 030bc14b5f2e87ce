//! Error types for the model layer.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur while declaring, reading or mutating model data.
#[derive(Debug, Error)]
pub enum ModelError {
    /// No shard of the requested type is part of the model.
    #[error("shard not found: {shard}")]
    ShardNotFound { shard: String },

    /// The same shard type was registered twice.
    #[error("shard registered twice: {shard}")]
    DuplicateShard { shard: String },

    /// No structure with this name is declared in the shard.
    #[error("structure not found: {shard}.{structure}")]
    StructureNotFound { shard: String, structure: String },

    /// Two structures with the same name were declared in one shard.
    #[error("structure declared twice: {structure}")]
    DuplicateStructure { structure: String },

    /// The structure exists but holds different types than requested.
    #[error("type mismatch for structure {structure}")]
    TypeMismatch { structure: String },

    /// An entity with this id already exists in the collection.
    #[error("duplicate key {entity} in {structure}")]
    DuplicateKey { structure: String, entity: String },

    /// The entity does not exist in the collection.
    #[error("entity {entity} not found in {structure}")]
    EntityNotFound { structure: String, entity: String },

    /// The pair is already linked.
    #[error("duplicated relation {parent} -> {child} in {structure}")]
    DuplicatedRelation {
        structure: String,
        parent: String,
        child: String,
    },

    /// The pair is not linked.
    #[error("missing relation {parent} -> {child} in {structure}")]
    MissingRelation {
        structure: String,
        parent: String,
        child: String,
    },

    /// Linking the pair would give a key more values than the relation allows.
    #[error("{cardinality} relation {structure} cannot link {parent} -> {child}")]
    CardinalityViolation {
        structure: String,
        cardinality: String,
        parent: String,
        child: String,
    },

    /// A change record carries an action the structure does not support.
    #[error("action '{action}' is not supported by {structure}")]
    UnsupportedAction { structure: String, action: String },

    /// A change record or row is missing data it needs.
    #[error("invalid record for {structure}: {reason}")]
    InvalidRecord { structure: String, reason: String },

    /// A structure slot was copied a second time.
    #[error("structure {structure} is already a private copy")]
    AlreadyCopied { structure: String },

    /// Serialization/deserialization of properties failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
