//! Entity model for tessera.
//!
//! Defines the data that every other tessera crate works over:
//! - [`Collection`]: entity to properties map for one entity kind
//! - [`Relation`]: bidirectional parent/child mapping with a [`Cardinality`]
//! - [`Shard`]: a named bundle of structures, declared through [`ShardDef`]
//! - [`Model`]: immutable aggregate of shards at one point in time
//!
//! Collections and relations are persistent maps, so copying one is O(1)
//! and a model built from another shares every structure it did not replace.

mod collection;
mod descriptor;
mod error;
mod model;
mod properties;
mod records;
mod relation;
mod schema;
mod shard;
mod structure;

pub use collection::Collection;
pub use descriptor::{Cardinality, StructureDescriptor, StructureKind};
pub use error::{ModelError, ModelResult};
pub use model::{Model, ModelBuilder};
pub use properties::Properties;
pub use records::{
    ChangeAction, ChangeRecord, CollectionRow, RelationRow, StructureRecords, StructureRows,
};
pub use relation::Relation;
pub use schema::{CollectionDef, RelationDef, ShardDef, ShardSchema};
pub use shard::Shard;
pub use structure::{Structure, downcast, downcast_mut};

pub use tessera_types::{Entity, EntityId, EntityKind};
