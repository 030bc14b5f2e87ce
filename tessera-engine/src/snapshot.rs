//! Copy-on-write working state of one command.
//!
//! A [`Snapshot`] starts out reading straight through to its base model.
//! The first successful write to a structure promotes that structure's
//! slot from a shared reference to a private shallow copy, and every later
//! read or write of the structure goes to the copy. Opening a writable view
//! or a write that fails copies nothing. [`Snapshot::freeze`] turns the
//! copies into a successor model that shares everything else with the base.

use crate::error::{EngineError, EngineResult};
use std::any::TypeId;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::Arc;
use tessera_changes::{
    ChangeResult, ChangesFrame, ModelChanges, TrackedCollection, TrackedRelation,
};
use tessera_model::{
    Collection, CollectionDef, Entity, EntityKind, Model, ModelError, Properties, Relation,
    RelationDef, Shard, ShardDef, Structure, StructureDescriptor, StructureRecords,
    StructureRows, downcast, downcast_mut,
};

/// Behaviours a snapshot can be opened with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Feature {
    /// Structures are copied on first write. Always required.
    CopyOnWrite,
    /// Writes are logged into change sets.
    Tracking,
}

/// Returns whether the feature list asks for tracking.
fn tracking_requested(features: &[Feature]) -> EngineResult<bool> {
    match features {
        [Feature::CopyOnWrite] => Ok(false),
        [Feature::CopyOnWrite, Feature::Tracking] => Ok(true),
        other => Err(EngineError::InvalidFeatures(format!("{other:?}"))),
    }
}

/// One structure of a shard snapshot.
///
/// Holds the base model's instance until the first write, and a private
/// copy from then on.
pub struct Slot {
    shared: Arc<dyn Structure>,
    copy: Option<Box<dyn Structure>>,
}

impl Slot {
    #[must_use]
    pub fn new(shared: Arc<dyn Structure>) -> Self {
        Self { shared, copy: None }
    }

    /// The copy if there is one, the base instance otherwise.
    #[must_use]
    pub fn get(&self) -> &dyn Structure {
        self.copy.as_deref().unwrap_or(self.shared.as_ref())
    }

    #[must_use]
    pub fn is_owned(&self) -> bool {
        self.copy.is_some()
    }

    /// Takes a private copy of the base instance and returns it.
    ///
    /// # Errors
    ///
    /// Returns `AlreadyCopied` if the slot already holds a copy.
    pub fn promote(&mut self) -> EngineResult<&mut dyn Structure> {
        if self.copy.is_some() {
            return Err(ModelError::AlreadyCopied {
                structure: self.shared.descriptor().qualified_name(),
            }
            .into());
        }
        Ok(self.copy.insert(self.shared.clone_structure()).as_mut())
    }

    fn copy_mut(&mut self) -> &mut dyn Structure {
        self.copy
            .get_or_insert_with(|| self.shared.clone_structure())
            .as_mut()
    }

    /// Drops the copy; reads go to the base instance again.
    fn discard(&mut self) {
        self.copy = None;
    }

    fn into_shared(self) -> Arc<dyn Structure> {
        match self.copy {
            Some(copy) => Arc::from(copy),
            None => self.shared,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_owned() { "owned" } else { "shared" };
        write!(f, "{}({state})", self.get().descriptor())
    }
}

/// Working state of one shard.
struct ShardSnapshot {
    base: Arc<Shard>,
    slots: Vec<Slot>,
    frame: Option<ChangesFrame>,
    copies: usize,
}

impl ShardSnapshot {
    fn new(base: Arc<Shard>) -> Self {
        let slots = base
            .structures()
            .iter()
            .map(|s| Slot::new(Arc::clone(s)))
            .collect();
        Self {
            base,
            slots,
            frame: None,
            copies: 0,
        }
    }

    fn position(&self, structure: &str) -> EngineResult<usize> {
        self.base.position(structure).ok_or_else(|| {
            ModelError::StructureNotFound {
                shard: self.base.name().to_string(),
                structure: structure.to_string(),
            }
            .into()
        })
    }

    fn read(&self, structure: &str) -> EngineResult<&dyn Structure> {
        let index = self.position(structure)?;
        Ok(self.slots[index].get())
    }

    /// Runs one write against a structure, handing it the frame to log
    /// into when tracking.
    ///
    /// The structure is copied right before its first write. If that first
    /// write fails the copy is dropped again, together with any frame or
    /// change set it opened, so the structure stays shared with the base.
    fn write<R>(
        &mut self,
        structure: &str,
        tracking: bool,
        op: impl FnOnce(&mut dyn Structure, Option<&mut ChangesFrame>) -> EngineResult<R>,
    ) -> EngineResult<R> {
        let index = self.position(structure)?;
        let name = self.slots[index].get().descriptor().name;
        let first_write = !self.slots[index].is_owned();
        let new_frame = tracking && self.frame.is_none();
        let new_set = tracking
            && self
                .frame
                .as_ref()
                .is_none_or(|frame| frame.get(name).is_none());

        let slot = &mut self.slots[index];
        let target = if first_write {
            slot.promote()?
        } else {
            slot.copy_mut()
        };
        let frame = if tracking {
            let (shard, type_id) = (self.base.name(), self.base.type_id());
            Some(
                self.frame
                    .get_or_insert_with(|| ChangesFrame::new(shard, type_id)),
            )
        } else {
            None
        };

        let result = op(target, frame);
        match &result {
            Ok(_) if first_write => self.copies += 1,
            Ok(_) => {}
            Err(_) => {
                if first_write {
                    self.slots[index].discard();
                }
                if new_frame {
                    self.frame = None;
                } else if let Some(frame) = self.frame.as_mut().filter(|_| new_set) {
                    frame.discard_empty(name);
                }
            }
        }
        result
    }
}

/// Mutable, single-use working copy of a model.
///
/// Opened with `[CopyOnWrite]` or `[CopyOnWrite, Tracking]`. A tracking
/// snapshot logs every write; [`Snapshot::freeze`] hands the log out with
/// the successor model.
pub struct Snapshot {
    base: Arc<Model>,
    tracking: bool,
    shards: HashMap<TypeId, ShardSnapshot>,
    order: Vec<TypeId>,
}

impl Snapshot {
    /// Opens a snapshot over `base`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFeatures` for any feature list other than
    /// `[CopyOnWrite]` and `[CopyOnWrite, Tracking]`.
    pub fn new(base: Arc<Model>, features: &[Feature]) -> EngineResult<Self> {
        Ok(Self {
            tracking: tracking_requested(features)?,
            base,
            shards: HashMap::new(),
            order: Vec::new(),
        })
    }

    /// The model this snapshot was opened on.
    #[must_use]
    pub fn base(&self) -> &Arc<Model> {
        &self.base
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// Number of structures copied so far.
    #[must_use]
    pub fn copied_structures(&self) -> usize {
        self.shards.values().map(|s| s.copies).sum()
    }

    /// Whether any tracked write survived composition.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.shards
            .values()
            .any(|s| s.frame.as_ref().is_some_and(ChangesFrame::has_changes))
    }

    /// Reads a collection, from the private copy if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the shard or collection is unknown.
    pub fn collection<S: ShardDef, K: EntityKind, P: Properties>(
        &self,
        def: CollectionDef<S, K, P>,
    ) -> EngineResult<&Collection<K, P>> {
        match self.shards.get(&TypeId::of::<S>()) {
            Some(shard) => Ok(downcast(shard.read(def.name())?)?),
            None => Ok(self.base.collection(def)?),
        }
    }

    /// Reads a relation, from the private copy if there is one.
    ///
    /// # Errors
    ///
    /// Fails if the shard or relation is unknown.
    pub fn relation<S: ShardDef, P: EntityKind, C: EntityKind>(
        &self,
        def: RelationDef<S, P, C>,
    ) -> EngineResult<&Relation<P, C>> {
        match self.shards.get(&TypeId::of::<S>()) {
            Some(shard) => Ok(downcast(shard.read(def.name())?)?),
            None => Ok(self.base.relation(def)?),
        }
    }

    /// Writable view of a collection.
    ///
    /// Opening the view copies nothing: the collection is copied by the
    /// first write through the view that succeeds. The view logs its
    /// writes when the snapshot is tracking, and writes through untracked
    /// otherwise.
    ///
    /// # Errors
    ///
    /// Fails if the shard or collection is unknown, or declared with other
    /// types.
    pub fn collection_mut<S: ShardDef, K: EntityKind, P: Properties>(
        &mut self,
        def: CollectionDef<S, K, P>,
    ) -> EngineResult<CollectionMut<'_, S, K, P>> {
        let tracking = self.tracking;
        let shard = self.shard_mut::<S>()?;
        downcast::<Collection<K, P>>(shard.read(def.name())?)?;
        Ok(CollectionMut {
            shard,
            def,
            tracking,
        })
    }

    /// Writable view of a relation. Copies the relation on the first
    /// successful write.
    ///
    /// # Errors
    ///
    /// Fails if the shard or relation is unknown, or declared with other
    /// types.
    pub fn relation_mut<S: ShardDef, P: EntityKind, C: EntityKind>(
        &mut self,
        def: RelationDef<S, P, C>,
    ) -> EngineResult<RelationMut<'_, S, P, C>> {
        let tracking = self.tracking;
        let shard = self.shard_mut::<S>()?;
        downcast::<Relation<P, C>>(shard.read(def.name())?)?;
        Ok(RelationMut {
            shard,
            def,
            tracking,
        })
    }

    /// Applies recorded changes, logging them if tracking.
    ///
    /// Used for undo and redo. Stops at the first conflict; the snapshot
    /// must then be dropped.
    ///
    /// # Errors
    ///
    /// Fails if a frame names a shard outside the model, or a change does
    /// not match the current state.
    pub fn apply_changes(&mut self, changes: &ModelChanges) -> EngineResult<()> {
        let tracking = self.tracking;
        for frame in changes.frames() {
            let shard = self.shard_entry(frame.type_id(), frame.shard_name())?;
            for set in frame.sets().iter().filter(|set| !set.is_empty()) {
                let name = set.descriptor().name;
                shard.write(name, tracking, |target, frame| {
                    let log = frame.map(|f| f.get_or_insert_with(name, || set.empty_like()));
                    Ok(set.apply_to(target, log)?)
                })?;
            }
        }
        Ok(())
    }

    /// Replaces the contents of a structure with persisted rows. Never
    /// tracked.
    ///
    /// # Errors
    ///
    /// Fails if the descriptor does not match a structure of the model, or
    /// the rows do not decode.
    pub fn load_rows(
        &mut self,
        descriptor: &StructureDescriptor,
        rows: &StructureRows,
    ) -> EngineResult<()> {
        let shard = self.shard_named(descriptor.shard)?;
        if shard.read(descriptor.name)?.descriptor() != descriptor {
            return Err(ModelError::TypeMismatch {
                structure: descriptor.qualified_name(),
            }
            .into());
        }
        shard.write(descriptor.name, false, |target, _| {
            target.clear();
            Ok(target.load_rows(rows)?)
        })
    }

    /// Applies history records to a structure. Never tracked.
    ///
    /// # Errors
    ///
    /// Fails if the records name an unknown structure, or do not apply.
    pub fn apply_records(&mut self, records: &StructureRecords) -> EngineResult<()> {
        let shard = self.shard_named(&records.shard)?;
        shard.write(&records.structure, false, |target, _| {
            Ok(target.apply_records(&records.entries)?)
        })
    }

    /// Ends the snapshot: the successor model and the changes that lead to it.
    ///
    /// The successor replaces exactly the shards with a copied structure
    /// and shares the rest with the base. Frames come out in first-write
    /// order; an untracked snapshot yields no frames.
    ///
    /// # Errors
    ///
    /// Fails only if a shard could not be rebuilt from its slots.
    pub fn freeze(self) -> EngineResult<(Model, ModelChanges)> {
        let Snapshot {
            base,
            mut shards,
            order,
            ..
        } = self;
        let mut replaced = Vec::new();
        let mut frames = Vec::new();
        for type_id in order {
            let Some(shard) = shards.remove(&type_id) else {
                continue;
            };
            if let Some(frame) = shard.frame {
                frames.push(frame);
            }
            if shard.copies > 0 {
                let structures = shard.slots.into_iter().map(Slot::into_shared).collect();
                replaced.push(shard.base.with_structures(structures)?);
            }
        }
        let model = base.successor(replaced)?;
        Ok((model, ModelChanges::from_frames(frames)))
    }

    fn shard_mut<S: ShardDef>(&mut self) -> EngineResult<&mut ShardSnapshot> {
        self.shard_entry(TypeId::of::<S>(), S::NAME)
    }

    fn shard_named(&mut self, name: &str) -> EngineResult<&mut ShardSnapshot> {
        let found = self
            .base
            .shards()
            .iter()
            .find(|s| s.name() == name)
            .map(|s| (s.type_id(), s.name()));
        match found {
            Some((type_id, name)) => self.shard_entry(type_id, name),
            None => Err(ModelError::ShardNotFound {
                shard: name.to_string(),
            }
            .into()),
        }
    }

    fn shard_entry(&mut self, type_id: TypeId, name: &str) -> EngineResult<&mut ShardSnapshot> {
        match self.shards.entry(type_id) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let base = self.base.shard_by_type(type_id).ok_or_else(|| {
                    ModelError::ShardNotFound {
                        shard: name.to_string(),
                    }
                })?;
                self.order.push(type_id);
                Ok(entry.insert(ShardSnapshot::new(Arc::clone(base))))
            }
        }
    }
}

impl fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Snapshot")
            .field("base_version", &self.base.version())
            .field("tracking", &self.tracking)
            .field("copied_structures", &self.copied_structures())
            .finish()
    }
}

/// Writable collection view handed out by [`Snapshot::collection_mut`].
pub struct CollectionMut<'a, S, K, P> {
    shard: &'a mut ShardSnapshot,
    def: CollectionDef<S, K, P>,
    tracking: bool,
}

impl<S: ShardDef, K: EntityKind, P: Properties> CollectionMut<'_, S, K, P> {
    /// Adds an entity under a fresh id.
    ///
    /// # Errors
    ///
    /// Fails if the change log rejects the addition.
    pub fn add(&mut self, properties: P) -> EngineResult<Entity<K>> {
        let entity = Entity::new();
        self.write(|collection| collection.insert(entity, properties))?;
        Ok(entity)
    }

    /// Adds an entity under a caller-chosen id.
    ///
    /// # Errors
    ///
    /// Fails if the entity exists, or was removed earlier in this command.
    pub fn add_with_id(&mut self, entity: Entity<K>, properties: P) -> EngineResult<()> {
        self.write(|collection| collection.insert(entity, properties))
    }

    /// Removes an entity and returns its properties.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist.
    pub fn remove(&mut self, entity: Entity<K>) -> EngineResult<P> {
        self.write(|collection| collection.remove(entity))
    }

    /// Replaces an entity's properties and returns the previous ones.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist.
    pub fn replace(&mut self, entity: Entity<K>, properties: P) -> EngineResult<P> {
        self.write(|collection| collection.replace(entity, properties))
    }

    /// Derives new properties from the current ones.
    ///
    /// # Errors
    ///
    /// Fails if the entity does not exist.
    pub fn modify(&mut self, entity: Entity<K>, f: impl FnOnce(&P) -> P) -> EngineResult<()> {
        self.write(|collection| collection.modify(entity, f))
    }

    // The types were checked when the view was opened, so the read
    // accessors below treat a failed downcast as absent.

    #[must_use]
    pub fn get(&self, entity: Entity<K>) -> Option<&P> {
        self.collection().ok()?.get(entity)
    }

    #[must_use]
    pub fn contains(&self, entity: Entity<K>) -> bool {
        self.collection().is_ok_and(|c| c.contains(entity))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.collection().map_or(0, |c| c.len())
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The collection as it stands: the copy once written, the base
    /// instance before.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the structure is not a `Collection<K, P>`.
    pub fn collection(&self) -> EngineResult<&Collection<K, P>> {
        Ok(downcast(self.shard.read(self.def.name())?)?)
    }

    fn write<R>(
        &mut self,
        op: impl FnOnce(&mut TrackedCollection<'_, K, P>) -> ChangeResult<R>,
    ) -> EngineResult<R> {
        let def = self.def;
        self.shard.write(def.name(), self.tracking, |target, frame| {
            let collection = downcast_mut::<Collection<K, P>>(target)?;
            let log = match frame {
                Some(frame) => Some(frame.collection_mut(def)?),
                None => None,
            };
            Ok(op(&mut TrackedCollection::new(collection, log))?)
        })
    }
}

/// Writable relation view handed out by [`Snapshot::relation_mut`].
pub struct RelationMut<'a, S, P, C> {
    shard: &'a mut ShardSnapshot,
    def: RelationDef<S, P, C>,
    tracking: bool,
}

impl<S: ShardDef, P: EntityKind, C: EntityKind> RelationMut<'_, S, P, C> {
    /// Links a pair.
    ///
    /// # Errors
    ///
    /// Fails on a duplicate link or a cardinality violation.
    pub fn link(&mut self, parent: Entity<P>, child: Entity<C>) -> EngineResult<()> {
        self.write(|relation| relation.link(parent, child))
    }

    /// Unlinks a pair.
    ///
    /// # Errors
    ///
    /// Fails if the pair is not linked.
    pub fn unlink(&mut self, parent: Entity<P>, child: Entity<C>) -> EngineResult<()> {
        self.write(|relation| relation.unlink(parent, child))
    }

    /// Unlinks every child of a parent and returns how many there were.
    /// A parent without children leaves the relation shared.
    ///
    /// # Errors
    ///
    /// Fails if the change log rejects one of the unlinks.
    pub fn unlink_parent(&mut self, parent: Entity<P>) -> EngineResult<usize> {
        if self.relation()?.children(parent).next().is_none() {
            return Ok(0);
        }
        self.write(|relation| relation.unlink_parent(parent))
    }

    /// Unlinks every parent of a child and returns how many there were.
    ///
    /// # Errors
    ///
    /// Fails if the change log rejects one of the unlinks.
    pub fn unlink_child(&mut self, child: Entity<C>) -> EngineResult<usize> {
        if self.relation()?.parents(child).next().is_none() {
            return Ok(0);
        }
        self.write(|relation| relation.unlink_child(child))
    }

    #[must_use]
    pub fn contains(&self, parent: Entity<P>, child: Entity<C>) -> bool {
        self.relation().is_ok_and(|r| r.contains(parent, child))
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.tracking
    }

    /// The relation as it stands.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the structure is not a `Relation<P, C>`.
    pub fn relation(&self) -> EngineResult<&Relation<P, C>> {
        Ok(downcast(self.shard.read(self.def.name())?)?)
    }

    fn write<R>(
        &mut self,
        op: impl FnOnce(&mut TrackedRelation<'_, P, C>) -> ChangeResult<R>,
    ) -> EngineResult<R> {
        let def = self.def;
        self.shard.write(def.name(), self.tracking, |target, frame| {
            let relation = downcast_mut::<Relation<P, C>>(target)?;
            let log = match frame {
                Some(frame) => Some(frame.relation_mut(def)?),
                None => None,
            };
            Ok(op(&mut TrackedRelation::new(relation, log))?)
        })
    }
}
