//! Persistence contracts for tessera.
//!
//! The engine never talks to a concrete backend. It saves and loads through
//! three traits:
//!
//! - [`Repository`]: current rows of every collection and relation
//! - [`HistoryRepository`]: per-command change records keyed by [`ChangeId`]
//! - [`Migrator`]: schema upkeep, always run before a load
//!
//! The [`memory`] module holds in-memory implementations of all three.
//!
//! [`ChangeId`]: tessera_types::ChangeId

mod error;
pub mod memory;
mod record;
mod repository;

pub use error::{StorageError, StorageResult};
pub use memory::{Call, CallLog, MemoryHistoryRepository, MemoryRepository, RecordingMigrator};
pub use record::HistoryRecord;
pub use repository::{HistoryRepository, Migrator, Repository};
