//! Change tracking for tessera models.
//!
//! Every write inside a command can be logged into a per-structure change
//! set. Change sets are always net: recording an entry for a key that
//! already has one composes the two, so a command that modifies one entity
//! three times yields a single modification.
//!
//! - [`CollectionChanges`] / [`RelationChanges`]: typed change sets
//! - [`TrackedCollection`] / [`TrackedRelation`]: write-through decorators that log
//! - [`ChangesFrame`]: all change sets of one shard
//! - [`ModelChanges`]: all frames of one command
//!
//! All change types support:
//! - **Invert**: the changes that undo these ones
//! - **Merge**: the net effect of two consecutive change sets
//! - **Apply**: replay onto a structure, checking recorded old data

mod change_set;
mod collection_changes;
mod error;
mod frame;
mod model_changes;
mod relation_changes;
mod tracked;

pub use change_set::{ChangeSet, downcast_changes, downcast_changes_mut};
pub use collection_changes::{CollectionChange, CollectionChanges};
pub use error::{ChangeError, ChangeResult};
pub use frame::ChangesFrame;
pub use model_changes::ModelChanges;
pub use relation_changes::{RelationChange, RelationChanges};
pub use tracked::{TrackedCollection, TrackedRelation};
