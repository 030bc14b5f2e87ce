use crate::error::{ChangeError, ChangeResult};
use crate::tracked::TrackedCollection;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use tessera_model::{
    ChangeAction, ChangeRecord, Collection, EntityKind, ModelError, Properties, StructureDescriptor,
    StructureRecords,
};
use tessera_types::{Entity, EntityId};

/// Net change of one entity.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionChange<P> {
    Added { new: P },
    Removed { old: P },
    Modified { old: P, new: P },
}

impl<P: Clone> CollectionChange<P> {
    #[must_use]
    pub fn action(&self) -> ChangeAction {
        match self {
            Self::Added { .. } => ChangeAction::Add,
            Self::Removed { .. } => ChangeAction::Remove,
            Self::Modified { .. } => ChangeAction::Modify,
        }
    }

    /// Properties before the change, if the entity existed.
    #[must_use]
    pub fn before(&self) -> Option<&P> {
        match self {
            Self::Added { .. } => None,
            Self::Removed { old } | Self::Modified { old, .. } => Some(old),
        }
    }

    /// Properties after the change, if the entity still exists.
    #[must_use]
    pub fn after(&self) -> Option<&P> {
        match self {
            Self::Removed { .. } => None,
            Self::Added { new } | Self::Modified { new, .. } => Some(new),
        }
    }

    /// The change that undoes this one.
    #[must_use]
    pub fn inverted(&self) -> Self {
        match self {
            Self::Added { new } => Self::Removed { old: new.clone() },
            Self::Removed { old } => Self::Added { new: old.clone() },
            Self::Modified { old, new } => Self::Modified {
                old: new.clone(),
                new: old.clone(),
            },
        }
    }
}

impl<P: PartialEq> CollectionChange<P> {
    /// Folds `next` into `self`. `Ok(None)` means the two cancel out.
    fn compose(self, next: Self) -> Result<Option<Self>, String> {
        use CollectionChange::{Added, Modified, Removed};

        let continuous = match (&self, &next) {
            (Added { new: a } | Modified { new: a, .. }, Removed { old: b } | Modified { old: b, .. }) => {
                a == b
            }
            _ => true,
        };
        if !continuous {
            return Err("old data does not match the previous new data".to_string());
        }

        match (self, next) {
            (Added { .. }, Removed { .. }) => Ok(None),
            (Added { .. }, Modified { new, .. }) => Ok(Some(Added { new })),
            (Modified { old, .. }, Modified { new, .. }) => Ok(Some(Modified { old, new })),
            (Modified { old, .. }, Removed { .. }) => Ok(Some(Removed { old })),
            (Removed { .. }, Added { .. }) => {
                Err("re-adding a removed entity is not supported".to_string())
            }
            (first, next) => Err(format!(
                "{} cannot follow {}",
                kind_name(&next),
                kind_name(&first)
            )),
        }
    }
}

fn kind_name<P>(change: &CollectionChange<P>) -> &'static str {
    match change {
        CollectionChange::Added { .. } => "add",
        CollectionChange::Removed { .. } => "remove",
        CollectionChange::Modified { .. } => "modify",
    }
}

/// Net changes of one collection, kept in the order keys were first touched.
///
/// Every entity appears at most once. Recording a change for an entity that
/// already has one composes the two, so the set always describes the net
/// effect of everything recorded.
pub struct CollectionChanges<K, P> {
    descriptor: StructureDescriptor,
    entries: BTreeMap<u64, (EntityId, CollectionChange<P>)>,
    index: HashMap<EntityId, u64>,
    next_seq: u64,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind, P: Properties> CollectionChanges<K, P> {
    #[must_use]
    pub fn new(descriptor: StructureDescriptor) -> Self {
        Self {
            descriptor,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    /// Number of entities with a net change.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_add(&mut self, entity: Entity<K>, new: P) -> ChangeResult<()> {
        self.record(entity.id(), CollectionChange::Added { new })
    }

    pub fn record_remove(&mut self, entity: Entity<K>, old: P) -> ChangeResult<()> {
        self.record(entity.id(), CollectionChange::Removed { old })
    }

    pub fn record_modify(&mut self, entity: Entity<K>, old: P, new: P) -> ChangeResult<()> {
        self.record(entity.id(), CollectionChange::Modified { old, new })
    }

    /// Records a change, composing it with any earlier change of the entity.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChangeSequence` if the change cannot follow the
    /// recorded one. The set is left unchanged in that case.
    pub fn record(&mut self, id: EntityId, change: CollectionChange<P>) -> ChangeResult<()> {
        let Some(&seq) = self.index.get(&id) else {
            let seq = self.next_seq;
            self.next_seq += 1;
            self.entries.insert(seq, (id, change));
            self.index.insert(id, seq);
            return Ok(());
        };

        let Some((_, previous)) = self.entries.get(&seq) else {
            return Err(self.sequence_error(id, "index out of sync".to_string()));
        };
        match previous.clone().compose(change) {
            Ok(Some(composed)) => {
                self.entries.insert(seq, (id, composed));
            }
            Ok(None) => {
                self.entries.remove(&seq);
                self.index.remove(&id);
            }
            Err(reason) => return Err(self.sequence_error(id, reason)),
        }
        Ok(())
    }

    fn sequence_error(&self, id: EntityId, reason: String) -> ChangeError {
        ChangeError::InvalidChangeSequence {
            structure: self.descriptor.qualified_name(),
            key: id.to_string(),
            reason,
        }
    }

    /// The net change of one entity.
    #[must_use]
    pub fn get(&self, entity: Entity<K>) -> Option<&CollectionChange<P>> {
        let seq = self.index.get(&entity.id())?;
        self.entries.get(seq).map(|(_, change)| change)
    }

    /// Iterates over changes in first-touch order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity<K>, &CollectionChange<P>)> + '_ {
        self.entries
            .values()
            .map(|(id, change)| (Entity::from_id(*id), change))
    }

    /// Added entities with their properties.
    pub fn added(&self) -> impl Iterator<Item = (Entity<K>, &P)> + '_ {
        self.iter().filter_map(|(e, change)| match change {
            CollectionChange::Added { new } => Some((e, new)),
            _ => None,
        })
    }

    /// Removed entities with their last properties.
    pub fn removed(&self) -> impl Iterator<Item = (Entity<K>, &P)> + '_ {
        self.iter().filter_map(|(e, change)| match change {
            CollectionChange::Removed { old } => Some((e, old)),
            _ => None,
        })
    }

    /// Modified entities with `(old, new)` properties.
    pub fn modified(&self) -> impl Iterator<Item = (Entity<K>, &P, &P)> + '_ {
        self.iter().filter_map(|(e, change)| match change {
            CollectionChange::Modified { old, new } => Some((e, old, new)),
            _ => None,
        })
    }

    /// The set that undoes this one: every change inverted, in reverse order.
    #[must_use]
    pub fn invert(&self) -> Self {
        let mut inverted = Self::new(self.descriptor);
        for (id, change) in self.entries.values().rev() {
            let seq = inverted.next_seq;
            inverted.next_seq += 1;
            inverted.entries.insert(seq, (*id, change.inverted()));
            inverted.index.insert(*id, seq);
        }
        inverted
    }

    /// Net effect of applying `self` and then `next`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for sets of different collections, or
    /// `InvalidChangeSequence` if `next` does not follow from `self`.
    pub fn merge(&self, next: &Self) -> ChangeResult<Self> {
        if self.descriptor != next.descriptor {
            return Err(ChangeError::TypeMismatch {
                structure: next.descriptor.qualified_name(),
            });
        }
        let mut merged = self.clone();
        for (id, change) in next.entries.values() {
            merged.record(*id, change.clone())?;
        }
        Ok(merged)
    }

    /// Applies every change to `target`, recording into `log` when given.
    ///
    /// Each change is checked against the target first: a remove or modify
    /// must find the entity holding exactly the old properties.
    ///
    /// # Errors
    ///
    /// Returns `ApplyConflict` on the first mismatch. Changes before it stay
    /// applied; callers discard the target on error.
    pub fn apply(
        &self,
        target: &mut Collection<K, P>,
        log: Option<&mut CollectionChanges<K, P>>,
    ) -> ChangeResult<()> {
        let mut tracked = TrackedCollection::new(target, log);
        for (entity, change) in self.iter() {
            if let Some(expected) = change.before() {
                if tracked.get(entity) != Some(expected) {
                    return Err(ChangeError::ApplyConflict {
                        structure: self.descriptor.qualified_name(),
                        key: entity.id().to_string(),
                        reason: "current properties differ from the recorded old data".to_string(),
                    });
                }
            }
            match change {
                CollectionChange::Added { new } => tracked.insert(entity, new.clone())?,
                CollectionChange::Removed { .. } => {
                    tracked.remove(entity)?;
                }
                CollectionChange::Modified { new, .. } => {
                    tracked.replace(entity, new.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Serializable form of the set.
    ///
    /// # Errors
    ///
    /// Fails if properties cannot be serialized.
    pub fn to_records(&self) -> ChangeResult<StructureRecords> {
        let mut records = StructureRecords::new(self.descriptor.shard, self.descriptor.name);
        for (id, change) in self.entries.values() {
            let record = match change {
                CollectionChange::Added { new } => ChangeRecord::add(*id, serde_json::to_value(new)?),
                CollectionChange::Removed { old } => {
                    ChangeRecord::remove(*id, serde_json::to_value(old)?)
                }
                CollectionChange::Modified { old, new } => ChangeRecord::modify(
                    *id,
                    serde_json::to_value(old)?,
                    serde_json::to_value(new)?,
                ),
            };
            records.entries.push(record);
        }
        Ok(records)
    }

    /// Rebuilds a set from records, composing repeated keys.
    ///
    /// # Errors
    ///
    /// Fails on relation actions, missing or malformed data, or a sequence
    /// that does not compose.
    pub fn from_records(
        descriptor: StructureDescriptor,
        records: &[ChangeRecord],
    ) -> ChangeResult<Self> {
        let mut changes = Self::new(descriptor);
        for record in records {
            let change = match record.action {
                ChangeAction::Add => CollectionChange::Added {
                    new: changes.decode(record.new_data.as_ref(), "new_data")?,
                },
                ChangeAction::Remove => CollectionChange::Removed {
                    old: changes.decode(record.old_data.as_ref(), "old_data")?,
                },
                ChangeAction::Modify => CollectionChange::Modified {
                    old: changes.decode(record.old_data.as_ref(), "old_data")?,
                    new: changes.decode(record.new_data.as_ref(), "new_data")?,
                },
                ChangeAction::Link | ChangeAction::Unlink => {
                    return Err(ModelError::UnsupportedAction {
                        structure: descriptor.qualified_name(),
                        action: record.action.to_string(),
                    }
                    .into());
                }
            };
            changes.record(record.id, change)?;
        }
        Ok(changes)
    }

    fn decode(&self, value: Option<&serde_json::Value>, field: &str) -> ChangeResult<P> {
        let value = value.ok_or_else(|| ModelError::InvalidRecord {
            structure: self.descriptor.qualified_name(),
            reason: format!("missing {field}"),
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl<K, P: Clone> Clone for CollectionChanges<K, P> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            entries: self.entries.clone(),
            index: self.index.clone(),
            next_seq: self.next_seq,
            _kind: PhantomData,
        }
    }
}

/// Equal when both describe the same changes in the same order.
impl<K, P: PartialEq> PartialEq for CollectionChanges<K, P> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.entries.values().eq(other.entries.values())
    }
}

impl<K, P: fmt::Debug> fmt::Debug for CollectionChanges<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionChanges")
            .field("structure", &self.descriptor.qualified_name())
            .field("entries", &self.entries.values().collect::<Vec<_>>())
            .finish()
    }
}
