//! Abstract persistence contracts.
//!
//! The engine depends only on these traits. Structures are addressed by
//! their [`StructureDescriptor`], the stable `(name, type)` key declared by
//! the shard.

use crate::error::StorageResult;
use crate::record::HistoryRecord;
use async_trait::async_trait;
use tessera_model::{CollectionRow, RelationRow, StructureDescriptor, StructureKind, StructureRows};
use tessera_types::ChangeId;

/// Stores the current rows of every collection and relation.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Persists a batch of changes, in order.
    ///
    /// Collection entries insert, update or delete rows; relation entries
    /// insert or delete pairs. Implementations apply the whole batch or
    /// nothing.
    async fn save(&self, batch: &[HistoryRecord]) -> StorageResult<()>;

    /// Returns every row of a collection.
    async fn load_collection(&self, descriptor: &StructureDescriptor) -> StorageResult<Vec<CollectionRow>>;

    /// Returns every pair of a relation.
    async fn load_relation(&self, descriptor: &StructureDescriptor) -> StorageResult<Vec<RelationRow>>;

    /// Loads a structure of either kind.
    async fn load(&self, descriptor: &StructureDescriptor) -> StorageResult<StructureRows> {
        match descriptor.kind {
            StructureKind::Collection => Ok(StructureRows::Collection(
                self.load_collection(descriptor).await?,
            )),
            StructureKind::Relation { .. } => Ok(StructureRows::Relation(
                self.load_relation(descriptor).await?,
            )),
        }
    }
}

/// Brings backend storage up to date with the declared structures.
///
/// Runs before any load reads data.
#[async_trait]
pub trait Migrator: Send + Sync {
    async fn migrate(&self, descriptors: &[StructureDescriptor]) -> StorageResult<()>;
}

/// Stores per-command change records keyed by a monotonic [`ChangeId`].
#[async_trait]
pub trait HistoryRepository: Send + Sync {
    /// Appends a record. Ids must increase strictly.
    async fn append(&self, record: HistoryRecord) -> StorageResult<()>;

    /// Records with an id above `after` (all records for `None`), in id order.
    async fn load_since(&self, after: Option<ChangeId>) -> StorageResult<Vec<HistoryRecord>>;

    /// Id of the newest record.
    async fn latest(&self) -> StorageResult<Option<ChangeId>>;
}
