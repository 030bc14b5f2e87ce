use crate::collection_changes::CollectionChanges;
use crate::error::{ChangeError, ChangeResult};
use crate::relation_changes::RelationChanges;
use std::any::Any;
use std::fmt;
use tessera_model::{
    Collection, EntityKind, Properties, Relation, Structure, StructureDescriptor, StructureRecords,
    downcast_mut,
};

/// Type-erased change set of one collection or relation.
///
/// Frames hold their change sets behind this trait so that undo, redo and
/// persistence can work over a whole command without knowing types.
pub trait ChangeSet: Any + Send + Sync + fmt::Debug {
    fn descriptor(&self) -> &StructureDescriptor;

    /// Number of keys with a net change.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn inverted(&self) -> Box<dyn ChangeSet>;

    /// Net effect of `self` followed by `next`.
    fn merged(&self, next: &dyn ChangeSet) -> ChangeResult<Box<dyn ChangeSet>>;

    /// An empty set of the same type and structure.
    fn empty_like(&self) -> Box<dyn ChangeSet>;

    /// Applies the changes to a structure of the matching type, recording
    /// into `log` when given.
    fn apply_to(&self, target: &mut dyn Structure, log: Option<&mut dyn ChangeSet>) -> ChangeResult<()>;

    fn to_records(&self) -> ChangeResult<StructureRecords>;

    fn clone_box(&self) -> Box<dyn ChangeSet>;

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

impl Clone for Box<dyn ChangeSet> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Downcasts an erased change set to its concrete type.
pub fn downcast_changes<T: ChangeSet>(set: &dyn ChangeSet) -> ChangeResult<&T> {
    let structure = set.descriptor().qualified_name();
    set.as_any()
        .downcast_ref::<T>()
        .ok_or(ChangeError::TypeMismatch { structure })
}

/// Downcasts an erased change set to its concrete type, mutably.
pub fn downcast_changes_mut<T: ChangeSet>(set: &mut dyn ChangeSet) -> ChangeResult<&mut T> {
    let structure = set.descriptor().qualified_name();
    set.as_any_mut()
        .downcast_mut::<T>()
        .ok_or(ChangeError::TypeMismatch { structure })
}

fn typed_log<T: ChangeSet>(log: Option<&mut dyn ChangeSet>) -> ChangeResult<Option<&mut T>> {
    log.map(downcast_changes_mut::<T>).transpose()
}

impl<K: EntityKind, P: Properties> ChangeSet for CollectionChanges<K, P> {
    fn descriptor(&self) -> &StructureDescriptor {
        CollectionChanges::descriptor(self)
    }

    fn len(&self) -> usize {
        CollectionChanges::len(self)
    }

    fn inverted(&self) -> Box<dyn ChangeSet> {
        Box::new(self.invert())
    }

    fn merged(&self, next: &dyn ChangeSet) -> ChangeResult<Box<dyn ChangeSet>> {
        let next = downcast_changes::<Self>(next)?;
        Ok(Box::new(self.merge(next)?))
    }

    fn empty_like(&self) -> Box<dyn ChangeSet> {
        Box::new(Self::new(*CollectionChanges::descriptor(self)))
    }

    fn apply_to(&self, target: &mut dyn Structure, log: Option<&mut dyn ChangeSet>) -> ChangeResult<()> {
        let target = downcast_mut::<Collection<K, P>>(target)?;
        self.apply(target, typed_log::<Self>(log)?)
    }

    fn to_records(&self) -> ChangeResult<StructureRecords> {
        CollectionChanges::to_records(self)
    }

    fn clone_box(&self) -> Box<dyn ChangeSet> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<P: EntityKind, C: EntityKind> ChangeSet for RelationChanges<P, C> {
    fn descriptor(&self) -> &StructureDescriptor {
        RelationChanges::descriptor(self)
    }

    fn len(&self) -> usize {
        RelationChanges::len(self)
    }

    fn inverted(&self) -> Box<dyn ChangeSet> {
        Box::new(self.invert())
    }

    fn merged(&self, next: &dyn ChangeSet) -> ChangeResult<Box<dyn ChangeSet>> {
        let next = downcast_changes::<Self>(next)?;
        Ok(Box::new(self.merge(next)?))
    }

    fn empty_like(&self) -> Box<dyn ChangeSet> {
        Box::new(Self::new(*RelationChanges::descriptor(self)))
    }

    fn apply_to(&self, target: &mut dyn Structure, log: Option<&mut dyn ChangeSet>) -> ChangeResult<()> {
        let target = downcast_mut::<Relation<P, C>>(target)?;
        self.apply(target, typed_log::<Self>(log)?)
    }

    fn to_records(&self) -> ChangeResult<StructureRecords> {
        RelationChanges::to_records(self)
    }

    fn clone_box(&self) -> Box<dyn ChangeSet> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
