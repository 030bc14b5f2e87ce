use crate::descriptor::StructureDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::records::{ChangeRecord, StructureRows};
use std::any::Any;
use std::fmt;

/// Type-erased view of a collection or relation.
///
/// Shards store their structures behind this trait so that snapshots,
/// loaders and history replay can work over every structure without
/// knowing its entity and property types. Typed access goes through
/// [`downcast`] / [`downcast_mut`].
pub trait Structure: Any + Send + Sync + fmt::Debug {
    /// The descriptor this structure was declared with.
    fn descriptor(&self) -> &StructureDescriptor;

    /// Number of entities (collections) or linked pairs (relations).
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Shallow copy. Cheap: the underlying maps share their nodes.
    fn clone_structure(&self) -> Box<dyn Structure>;

    /// Removes every entity or pair.
    fn clear(&mut self);

    /// Inserts persisted rows.
    fn load_rows(&mut self, rows: &StructureRows) -> ModelResult<()>;

    /// Applies change records in order, without any tracking.
    fn apply_records(&mut self, records: &[ChangeRecord]) -> ModelResult<()>;

    /// Returns every row, in the form a repository stores.
    fn to_rows(&self) -> ModelResult<StructureRows>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Downcasts an erased structure to its concrete type.
pub fn downcast<T: Structure>(structure: &dyn Structure) -> ModelResult<&T> {
    let name = structure.descriptor().qualified_name();
    structure
        .as_any()
        .downcast_ref::<T>()
        .ok_or(ModelError::TypeMismatch { structure: name })
}

/// Downcasts an erased structure to its concrete type, mutably.
pub fn downcast_mut<T: Structure>(structure: &mut dyn Structure) -> ModelResult<&mut T> {
    let name = structure.descriptor().qualified_name();
    structure
        .as_any_mut()
        .downcast_mut::<T>()
        .ok_or(ModelError::TypeMismatch { structure: name })
}
