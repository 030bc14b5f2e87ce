use crate::change_set::{ChangeSet, downcast_changes, downcast_changes_mut};
use crate::collection_changes::CollectionChanges;
use crate::error::{ChangeError, ChangeResult};
use crate::relation_changes::RelationChanges;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use tessera_model::{CollectionDef, EntityKind, Properties, RelationDef, ShardDef, StructureRecords};

/// All change sets of one shard for one command.
///
/// Created lazily, on the first write to the shard. Change sets are
/// likewise added on the first write to their structure, so a frame never
/// holds a set for a structure that was only read.
pub struct ChangesFrame {
    shard: &'static str,
    type_id: TypeId,
    sets: Vec<Box<dyn ChangeSet>>,
    index: HashMap<&'static str, usize>,
}

impl ChangesFrame {
    #[must_use]
    pub fn new(shard: &'static str, type_id: TypeId) -> Self {
        Self {
            shard,
            type_id,
            sets: Vec::new(),
            index: HashMap::new(),
        }
    }

    #[must_use]
    pub fn for_shard<S: ShardDef>() -> Self {
        Self::new(S::NAME, TypeId::of::<S>())
    }

    #[must_use]
    pub fn shard_name(&self) -> &'static str {
        self.shard
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    #[must_use]
    pub fn is<S: ShardDef>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    /// True if any change set in the frame is non-empty.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.sets.iter().any(|set| !set.is_empty())
    }

    /// Every change set, in first-write order. Sets may be empty when
    /// their changes cancelled out.
    #[must_use]
    pub fn sets(&self) -> &[Box<dyn ChangeSet>] {
        &self.sets
    }

    #[must_use]
    pub fn get(&self, structure: &str) -> Option<&dyn ChangeSet> {
        self.index.get(structure).map(|&i| self.sets[i].as_ref())
    }

    /// Returns the set for a structure, inserting `make()` if absent.
    pub fn get_or_insert_with(
        &mut self,
        structure: &'static str,
        make: impl FnOnce() -> Box<dyn ChangeSet>,
    ) -> &mut dyn ChangeSet {
        let existing = self.index.get(structure).copied();
        let i = match existing {
            Some(i) => i,
            None => {
                self.sets.push(make());
                self.index.insert(structure, self.sets.len() - 1);
                self.sets.len() - 1
            }
        };
        self.sets[i].as_mut()
    }

    /// Drops the set of a structure if it holds no changes. Returns whether
    /// a set was dropped.
    pub fn discard_empty(&mut self, structure: &str) -> bool {
        match self.index.get(structure) {
            Some(&i) if self.sets[i].is_empty() => {
                self.sets.remove(i);
                self.index = self
                    .sets
                    .iter()
                    .enumerate()
                    .map(|(i, set)| (set.descriptor().name, i))
                    .collect();
                true
            }
            _ => false,
        }
    }

    /// Typed changes of a collection, if it was written.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the handle is of another shard or type.
    pub fn collection<S: ShardDef, K: EntityKind, P: Properties>(
        &self,
        def: CollectionDef<S, K, P>,
    ) -> ChangeResult<Option<&CollectionChanges<K, P>>> {
        self.check::<S>(def.name())?;
        self.get(def.name())
            .map(downcast_changes::<CollectionChanges<K, P>>)
            .transpose()
    }

    /// Typed changes of a relation, if it was written.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the handle is of another shard or type.
    pub fn relation<S: ShardDef, P: EntityKind, C: EntityKind>(
        &self,
        def: RelationDef<S, P, C>,
    ) -> ChangeResult<Option<&RelationChanges<P, C>>> {
        self.check::<S>(def.name())?;
        self.get(def.name())
            .map(downcast_changes::<RelationChanges<P, C>>)
            .transpose()
    }

    /// Typed changes of a collection, inserting an empty set on first use.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the handle is of another shard or type.
    pub fn collection_mut<S: ShardDef, K: EntityKind, P: Properties>(
        &mut self,
        def: CollectionDef<S, K, P>,
    ) -> ChangeResult<&mut CollectionChanges<K, P>> {
        self.check::<S>(def.name())?;
        let set = self.get_or_insert_with(def.name(), || {
            Box::new(CollectionChanges::<K, P>::new(def.descriptor()))
        });
        downcast_changes_mut(set)
    }

    /// Typed changes of a relation, inserting an empty set on first use.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the handle is of another shard or type.
    pub fn relation_mut<S: ShardDef, P: EntityKind, C: EntityKind>(
        &mut self,
        def: RelationDef<S, P, C>,
    ) -> ChangeResult<&mut RelationChanges<P, C>> {
        self.check::<S>(def.name())?;
        let set = self.get_or_insert_with(def.name(), || {
            Box::new(RelationChanges::<P, C>::new(def.descriptor()))
        });
        downcast_changes_mut(set)
    }

    fn check<S: ShardDef>(&self, structure: &str) -> ChangeResult<()> {
        if self.is::<S>() {
            Ok(())
        } else {
            Err(ChangeError::TypeMismatch {
                structure: format!("{}.{structure}", S::NAME),
            })
        }
    }

    /// The frame that undoes this one.
    #[must_use]
    pub fn invert(&self) -> Self {
        Self {
            shard: self.shard,
            type_id: self.type_id,
            sets: self.sets.iter().map(|set| set.inverted()).collect(),
            index: self.index.clone(),
        }
    }

    /// Net effect of `self` followed by `next`, structure by structure.
    ///
    /// # Errors
    ///
    /// Fails if the frames belong to different shards, or any pair of
    /// change sets does not merge.
    pub fn merge(&self, next: &Self) -> ChangeResult<Self> {
        if self.type_id != next.type_id {
            return Err(ChangeError::TypeMismatch {
                structure: next.shard.to_string(),
            });
        }
        let mut merged = self.clone();
        for set in &next.sets {
            let name = set.descriptor().name;
            match merged.index.get(name) {
                Some(&i) => merged.sets[i] = merged.sets[i].merged(set.as_ref())?,
                None => {
                    merged.sets.push(set.clone_box());
                    merged.index.insert(name, merged.sets.len() - 1);
                }
            }
        }
        Ok(merged)
    }

    /// Records of every non-empty change set.
    ///
    /// # Errors
    ///
    /// Fails if properties cannot be serialized.
    pub fn to_records(&self) -> ChangeResult<Vec<StructureRecords>> {
        self.sets
            .iter()
            .filter(|set| !set.is_empty())
            .map(|set| set.to_records())
            .collect()
    }
}

impl Clone for ChangesFrame {
    fn clone(&self) -> Self {
        Self {
            shard: self.shard,
            type_id: self.type_id,
            sets: self.sets.clone(),
            index: self.index.clone(),
        }
    }
}

impl fmt::Debug for ChangesFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChangesFrame")
            .field("shard", &self.shard)
            .field("sets", &self.sets)
            .finish()
    }
}
