use crate::error::{ChangeError, ChangeResult};
use crate::tracked::TrackedRelation;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::marker::PhantomData;
use tessera_model::{
    ChangeAction, ChangeRecord, EntityKind, ModelError, Relation, StructureDescriptor,
    StructureRecords,
};
use tessera_types::{Entity, EntityId};

/// Net change of one parent/child pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelationChange {
    Linked,
    Unlinked,
}

impl RelationChange {
    #[must_use]
    pub const fn inverted(self) -> Self {
        match self {
            Self::Linked => Self::Unlinked,
            Self::Unlinked => Self::Linked,
        }
    }

    #[must_use]
    pub const fn action(self) -> ChangeAction {
        match self {
            Self::Linked => ChangeAction::Link,
            Self::Unlinked => ChangeAction::Unlink,
        }
    }
}

type Pair = (EntityId, EntityId);

/// Net changes of one relation, kept in the order pairs were first touched.
///
/// Linking and then unlinking a pair (or the reverse) cancels out; the same
/// change twice in a row is an invalid sequence.
pub struct RelationChanges<P, C> {
    descriptor: StructureDescriptor,
    entries: BTreeMap<u64, (Pair, RelationChange)>,
    index: HashMap<Pair, u64>,
    next_seq: u64,
    _kinds: PhantomData<fn() -> (P, C)>,
}

impl<P: EntityKind, C: EntityKind> RelationChanges<P, C> {
    #[must_use]
    pub fn new(descriptor: StructureDescriptor) -> Self {
        Self {
            descriptor,
            entries: BTreeMap::new(),
            index: HashMap::new(),
            next_seq: 0,
            _kinds: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn record_link(&mut self, parent: Entity<P>, child: Entity<C>) -> ChangeResult<()> {
        self.record((parent.id(), child.id()), RelationChange::Linked)
    }

    pub fn record_unlink(&mut self, parent: Entity<P>, child: Entity<C>) -> ChangeResult<()> {
        self.record((parent.id(), child.id()), RelationChange::Unlinked)
    }

    /// Records a change, cancelling it against an earlier opposite change.
    ///
    /// # Errors
    ///
    /// Returns `InvalidChangeSequence` if the pair already has the same change.
    pub fn record(&mut self, pair: (EntityId, EntityId), change: RelationChange) -> ChangeResult<()> {
        match self.index.get(&pair).copied() {
            None => {
                let seq = self.next_seq;
                self.next_seq += 1;
                self.entries.insert(seq, (pair, change));
                self.index.insert(pair, seq);
                Ok(())
            }
            Some(seq) => {
                let previous = self.entries.get(&seq).map(|(_, c)| *c);
                if previous == Some(change) {
                    return Err(ChangeError::InvalidChangeSequence {
                        structure: self.descriptor.qualified_name(),
                        key: format!("{} -> {}", pair.0, pair.1),
                        reason: format!("{} cannot follow {}", change.action(), change.action()),
                    });
                }
                self.entries.remove(&seq);
                self.index.remove(&pair);
                Ok(())
            }
        }
    }

    #[must_use]
    pub fn get(&self, parent: Entity<P>, child: Entity<C>) -> Option<RelationChange> {
        let seq = self.index.get(&(parent.id(), child.id()))?;
        self.entries.get(seq).map(|(_, change)| *change)
    }

    /// Iterates over changes in first-touch order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity<P>, Entity<C>, RelationChange)> + '_ {
        self.entries.values().map(|((p, c), change)| {
            (Entity::from_id(*p), Entity::from_id(*c), *change)
        })
    }

    pub fn linked(&self) -> impl Iterator<Item = (Entity<P>, Entity<C>)> + '_ {
        self.iter()
            .filter(|(_, _, change)| *change == RelationChange::Linked)
            .map(|(p, c, _)| (p, c))
    }

    pub fn unlinked(&self) -> impl Iterator<Item = (Entity<P>, Entity<C>)> + '_ {
        self.iter()
            .filter(|(_, _, change)| *change == RelationChange::Unlinked)
            .map(|(p, c, _)| (p, c))
    }

    /// The set that undoes this one: every change inverted, in reverse order.
    #[must_use]
    pub fn invert(&self) -> Self {
        let mut inverted = Self::new(self.descriptor);
        for (pair, change) in self.entries.values().rev() {
            let seq = inverted.next_seq;
            inverted.next_seq += 1;
            inverted.entries.insert(seq, (*pair, change.inverted()));
            inverted.index.insert(*pair, seq);
        }
        inverted
    }

    /// Net effect of applying `self` and then `next`.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` for sets of different relations, or
    /// `InvalidChangeSequence` if `next` repeats a change of `self`.
    pub fn merge(&self, next: &Self) -> ChangeResult<Self> {
        if self.descriptor != next.descriptor {
            return Err(ChangeError::TypeMismatch {
                structure: next.descriptor.qualified_name(),
            });
        }
        let mut merged = self.clone();
        for (pair, change) in next.entries.values() {
            merged.record(*pair, *change)?;
        }
        Ok(merged)
    }

    /// Applies every change to `target`, recording into `log` when given.
    ///
    /// All unlinks run before any link, so a pair that moves to a new parent
    /// never trips the cardinality check halfway.
    ///
    /// # Errors
    ///
    /// Returns `ApplyConflict` if a link already exists or an unlink is missing.
    pub fn apply(
        &self,
        target: &mut Relation<P, C>,
        log: Option<&mut RelationChanges<P, C>>,
    ) -> ChangeResult<()> {
        let mut tracked = TrackedRelation::new(target, log);
        for (parent, child) in self.unlinked() {
            tracked
                .unlink(parent, child)
                .map_err(|err| self.conflict(parent.id(), child.id(), err))?;
        }
        for (parent, child) in self.linked() {
            tracked
                .link(parent, child)
                .map_err(|err| self.conflict(parent.id(), child.id(), err))?;
        }
        Ok(())
    }

    fn conflict(&self, parent: EntityId, child: EntityId, err: ChangeError) -> ChangeError {
        match err {
            ChangeError::Model(model) => ChangeError::ApplyConflict {
                structure: self.descriptor.qualified_name(),
                key: format!("{parent} -> {child}"),
                reason: model.to_string(),
            },
            other => other,
        }
    }

    /// Serializable form of the set.
    ///
    /// # Errors
    ///
    /// Infallible today; kept fallible to match collection change sets.
    pub fn to_records(&self) -> ChangeResult<StructureRecords> {
        let mut records = StructureRecords::new(self.descriptor.shard, self.descriptor.name);
        records.entries = self
            .entries
            .values()
            .map(|((p, c), change)| match change {
                RelationChange::Linked => ChangeRecord::link(*p, *c),
                RelationChange::Unlinked => ChangeRecord::unlink(*p, *c),
            })
            .collect();
        Ok(records)
    }

    /// Rebuilds a set from records.
    ///
    /// # Errors
    ///
    /// Fails on collection actions, records without a child id, or a
    /// sequence that repeats a change.
    pub fn from_records(
        descriptor: StructureDescriptor,
        records: &[ChangeRecord],
    ) -> ChangeResult<Self> {
        let mut changes = Self::new(descriptor);
        for record in records {
            let change = match record.action {
                ChangeAction::Link => RelationChange::Linked,
                ChangeAction::Unlink => RelationChange::Unlinked,
                ChangeAction::Add | ChangeAction::Remove | ChangeAction::Modify => {
                    return Err(ModelError::UnsupportedAction {
                        structure: descriptor.qualified_name(),
                        action: record.action.to_string(),
                    }
                    .into());
                }
            };
            let child = record.related.ok_or_else(|| ModelError::InvalidRecord {
                structure: descriptor.qualified_name(),
                reason: "missing child id".to_string(),
            })?;
            changes.record((record.id, child), change)?;
        }
        Ok(changes)
    }
}

impl<P, C> Clone for RelationChanges<P, C> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            entries: self.entries.clone(),
            index: self.index.clone(),
            next_seq: self.next_seq,
            _kinds: PhantomData,
        }
    }
}

impl<P, C> PartialEq for RelationChanges<P, C> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.entries.values().eq(other.entries.values())
    }
}

impl<P, C> fmt::Debug for RelationChanges<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationChanges")
            .field("structure", &self.descriptor.qualified_name())
            .field("entries", &self.entries.values().collect::<Vec<_>>())
            .finish()
    }
}
