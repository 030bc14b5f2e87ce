//! Identity types for tessera.
//!
//! This crate defines the identity primitives every other tessera crate
//! builds on:
//! - [`EntityId`]: the untyped 128-bit identity of an entity (UUID v7)
//! - [`Entity`]: an [`EntityId`] tagged with its [`EntityKind`]
//! - [`ChangeId`]: the monotonic sequence number of a published change
//!
//! Entities carry no data of their own. Their properties live in the
//! collections of `tessera-model`.

mod change_id;
mod ids;

pub use change_id::ChangeId;
pub use ids::{Entity, EntityId, EntityKind};

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in type operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid UUID: {0}")]
    InvalidUuid(#[from] uuid::Error),

    #[error("invalid change id: {0}")]
    InvalidChangeId(String),
}
