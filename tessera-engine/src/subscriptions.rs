//! Subscriptions to published models.
//!
//! Subscribers register at one of four scopes: the whole model, one shard
//! frame, one collection or relation, or one entity of a collection. For
//! each publication the registry classifies every change set once, under
//! its lock, and hands out deliveries; the callbacks themselves run after
//! the lock is released, so a callback may subscribe, unsubscribe or
//! submit commands.

use crate::error::EngineResult;
use crate::publication::{Origin, Publication};
use parking_lot::Mutex;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};
use tessera_changes::{
    ChangeSet, ChangesFrame, CollectionChange, CollectionChanges, RelationChanges,
    downcast_changes,
};
use tessera_model::{
    CollectionDef, Entity, EntityId, EntityKind, ModelError, Properties, RelationDef, ShardDef,
    StructureDescriptor,
};
use tessera_types::ChangeId;
use tracing::{debug, warn};

type Delivery = Box<dyn FnOnce() + Send>;
type ModelCallback = Arc<dyn Fn(&Publication) + Send + Sync>;
type FrameCallback = Arc<dyn Fn(&Publication, &ChangesFrame) + Send + Sync>;
type CollectionCallback<K, P> = Arc<dyn Fn(&CollectionEvent<K, P>) + Send + Sync>;
type EntityCallback<K, P> = Arc<dyn Fn(Entity<K>, &CollectionChange<P>) + Send + Sync>;
type RelationCallback<P, C> = Arc<dyn Fn(&RelationEvent<P, C>) + Send + Sync>;

/// Changes of one collection in one publication, grouped by kind.
pub struct CollectionEvent<K, P> {
    pub change_id: ChangeId,
    pub origin: Origin,
    pub added: Vec<(Entity<K>, P)>,
    pub removed: Vec<(Entity<K>, P)>,
    /// `(entity, old, new)`.
    pub modified: Vec<(Entity<K>, P, P)>,
}

impl<K: EntityKind, P: Properties> CollectionEvent<K, P> {
    fn classify(publication: &Publication, changes: &CollectionChanges<K, P>) -> Self {
        let mut event = Self {
            change_id: publication.change_id,
            origin: publication.origin,
            added: Vec::new(),
            removed: Vec::new(),
            modified: Vec::new(),
        };
        for (entity, change) in changes.iter() {
            match change {
                CollectionChange::Added { new } => event.added.push((entity, new.clone())),
                CollectionChange::Removed { old } => event.removed.push((entity, old.clone())),
                CollectionChange::Modified { old, new } => {
                    event.modified.push((entity, old.clone(), new.clone()));
                }
            }
        }
        event
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// Manual impls: kind markers are bare tags and need not be `Clone` or
// `Debug` themselves.
impl<K, P: Clone> Clone for CollectionEvent<K, P> {
    fn clone(&self) -> Self {
        Self {
            change_id: self.change_id,
            origin: self.origin,
            added: self.added.clone(),
            removed: self.removed.clone(),
            modified: self.modified.clone(),
        }
    }
}

impl<K: EntityKind, P: Properties> fmt::Debug for CollectionEvent<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionEvent")
            .field("change_id", &self.change_id)
            .field("origin", &self.origin)
            .field("added", &self.added)
            .field("removed", &self.removed)
            .field("modified", &self.modified)
            .finish()
    }
}

/// Changes of one relation in one publication.
pub struct RelationEvent<P, C> {
    pub change_id: ChangeId,
    pub origin: Origin,
    pub linked: Vec<(Entity<P>, Entity<C>)>,
    pub unlinked: Vec<(Entity<P>, Entity<C>)>,
}

impl<P, C> Clone for RelationEvent<P, C> {
    fn clone(&self) -> Self {
        Self {
            change_id: self.change_id,
            origin: self.origin,
            linked: self.linked.clone(),
            unlinked: self.unlinked.clone(),
        }
    }
}

impl<P: EntityKind, C: EntityKind> fmt::Debug for RelationEvent<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationEvent")
            .field("change_id", &self.change_id)
            .field("origin", &self.origin)
            .field("linked", &self.linked)
            .field("unlinked", &self.unlinked)
            .finish()
    }
}

/// Subscribers of one structure.
trait Channel: Send {
    fn prepare(&mut self, publication: &Arc<Publication>, set: &dyn ChangeSet) -> Prepared;

    fn remove(&mut self, id: u64) -> bool;

    fn is_empty(&self) -> bool;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

#[derive(Default)]
struct Prepared {
    deliveries: Vec<Delivery>,
    /// Subscriptions the channel dropped on its own.
    dropped: Vec<u64>,
}

struct CollectionChannel<K, P> {
    collection: Vec<(u64, CollectionCallback<K, P>)>,
    entities: HashMap<EntityId, Vec<(u64, EntityCallback<K, P>)>>,
}

impl<K, P> Default for CollectionChannel<K, P> {
    fn default() -> Self {
        Self {
            collection: Vec::new(),
            entities: HashMap::new(),
        }
    }
}

impl<K: EntityKind, P: Properties> Channel for CollectionChannel<K, P> {
    fn prepare(&mut self, publication: &Arc<Publication>, set: &dyn ChangeSet) -> Prepared {
        let mut prepared = Prepared::default();
        let Ok(changes) = downcast_changes::<CollectionChanges<K, P>>(set) else {
            return prepared;
        };

        if !self.collection.is_empty() {
            let event = Arc::new(CollectionEvent::classify(publication, changes));
            for (_, callback) in &self.collection {
                let (callback, event) = (Arc::clone(callback), Arc::clone(&event));
                prepared.deliveries.push(Box::new(move || callback(event.as_ref())));
            }
        }

        if !self.entities.is_empty() {
            for (entity, change) in changes.iter() {
                let Some(subscribers) = self.entities.get(&entity.id()) else {
                    continue;
                };
                let change = Arc::new(change.clone());
                for (_, callback) in subscribers {
                    let (callback, change) = (Arc::clone(callback), Arc::clone(&change));
                    prepared
                        .deliveries
                        .push(Box::new(move || callback(entity, change.as_ref())));
                }
                // A removed entity gets its last notification, then its
                // bindings go away.
                if matches!(*change, CollectionChange::Removed { .. }) {
                    if let Some(gone) = self.entities.remove(&entity.id()) {
                        prepared.dropped.extend(gone.into_iter().map(|(id, _)| id));
                    }
                }
            }
        }
        prepared
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.len();
        self.collection.retain(|(i, _)| *i != id);
        self.entities.retain(|_, subscribers| {
            subscribers.retain(|(i, _)| *i != id);
            !subscribers.is_empty()
        });
        self.len() != before
    }

    fn is_empty(&self) -> bool {
        self.collection.is_empty() && self.entities.is_empty()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<K, P> CollectionChannel<K, P> {
    fn len(&self) -> usize {
        self.collection.len() + self.entities.values().map(Vec::len).sum::<usize>()
    }
}

struct RelationChannel<P, C> {
    subscribers: Vec<(u64, RelationCallback<P, C>)>,
}

impl<P, C> Default for RelationChannel<P, C> {
    fn default() -> Self {
        Self {
            subscribers: Vec::new(),
        }
    }
}

impl<P: EntityKind, C: EntityKind> Channel for RelationChannel<P, C> {
    fn prepare(&mut self, publication: &Arc<Publication>, set: &dyn ChangeSet) -> Prepared {
        let mut prepared = Prepared::default();
        let Ok(changes) = downcast_changes::<RelationChanges<P, C>>(set) else {
            return prepared;
        };
        let event = Arc::new(RelationEvent {
            change_id: publication.change_id,
            origin: publication.origin,
            linked: changes.linked().collect(),
            unlinked: changes.unlinked().collect(),
        });
        for (_, callback) in &self.subscribers {
            let (callback, event) = (Arc::clone(callback), Arc::clone(&event));
            prepared.deliveries.push(Box::new(move || callback(event.as_ref())));
        }
        prepared
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|(i, _)| *i != id);
        self.subscribers.len() != before
    }

    fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Channels are keyed by the structure's qualified name, which is what
/// change sets carry.
type ChannelKey = (&'static str, &'static str);

fn channel_key(descriptor: &StructureDescriptor) -> ChannelKey {
    (descriptor.shard, descriptor.name)
}

enum Location {
    Model,
    Frame(TypeId),
    Channel(ChannelKey),
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    model: Vec<(u64, ModelCallback)>,
    frames: HashMap<TypeId, Vec<(u64, FrameCallback)>>,
    channels: HashMap<ChannelKey, Box<dyn Channel>>,
    locations: HashMap<u64, Location>,
}

impl Registry {
    fn allocate(&mut self, location: Location) -> u64 {
        self.next_id += 1;
        self.locations.insert(self.next_id, location);
        self.next_id
    }

    fn channel<T: Channel + Default + 'static>(&mut self, key: ChannelKey) -> Option<&mut T> {
        self.channels
            .entry(key)
            .or_insert_with(|| Box::new(T::default()) as Box<dyn Channel>)
            .as_any_mut()
            .downcast_mut::<T>()
    }

    fn remove(&mut self, id: u64) -> bool {
        match self.locations.remove(&id) {
            Some(Location::Model) => self.model.retain(|(i, _)| *i != id),
            Some(Location::Frame(type_id)) => {
                if let Some(subscribers) = self.frames.get_mut(&type_id) {
                    subscribers.retain(|(i, _)| *i != id);
                    if subscribers.is_empty() {
                        self.frames.remove(&type_id);
                    }
                }
            }
            Some(Location::Channel(key)) => {
                if let Some(channel) = self.channels.get_mut(&key) {
                    channel.remove(id);
                    if channel.is_empty() {
                        self.channels.remove(&key);
                    }
                }
            }
            None => return false,
        }
        true
    }

    fn prepare(&mut self, publication: &Arc<Publication>) -> Vec<Delivery> {
        let mut deliveries: Vec<Delivery> = Vec::new();

        for (_, callback) in &self.model {
            let (callback, publication) = (Arc::clone(callback), Arc::clone(publication));
            deliveries.push(Box::new(move || callback(publication.as_ref())));
        }

        let mut dropped = Vec::new();
        for (index, frame) in publication.changes.frames().iter().enumerate() {
            if !frame.has_changes() {
                continue;
            }
            if let Some(subscribers) = self.frames.get(&frame.type_id()) {
                for (_, callback) in subscribers {
                    let (callback, publication) = (Arc::clone(callback), Arc::clone(publication));
                    deliveries.push(Box::new(move || {
                        callback(&publication, &publication.changes.frames()[index]);
                    }));
                }
            }
            for set in frame.sets().iter().filter(|set| !set.is_empty()) {
                let key = channel_key(set.descriptor());
                if let Some(channel) = self.channels.get_mut(&key) {
                    let prepared = channel.prepare(publication, set.as_ref());
                    deliveries.extend(prepared.deliveries);
                    dropped.extend(prepared.dropped);
                    if channel.is_empty() {
                        self.channels.remove(&key);
                    }
                }
            }
        }

        for id in dropped {
            self.locations.remove(&id);
        }
        deliveries
    }
}

/// Registers subscribers. Cheap to clone; every clone shares one registry.
#[derive(Clone, Default)]
pub struct Subscriptions {
    registry: Arc<Mutex<Registry>>,
}

impl Subscriptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per publication, with the full publication.
    pub fn on_model<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Publication) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock();
        let id = registry.allocate(Location::Model);
        registry.model.push((id, Arc::new(callback)));
        self.handle(id)
    }

    /// Called when a publication changes shard `S`.
    pub fn on_frame<S, F>(&self, callback: F) -> Subscription
    where
        S: ShardDef,
        F: Fn(&Publication, &ChangesFrame) + Send + Sync + 'static,
    {
        let type_id = TypeId::of::<S>();
        let mut registry = self.registry.lock();
        let id = registry.allocate(Location::Frame(type_id));
        registry
            .frames
            .entry(type_id)
            .or_default()
            .push((id, Arc::new(callback)));
        self.handle(id)
    }

    /// Called when a publication changes the collection.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the structure name is already subscribed
    /// under other types.
    pub fn on_collection<S, K, P, F>(
        &self,
        def: CollectionDef<S, K, P>,
        callback: F,
    ) -> EngineResult<Subscription>
    where
        S: ShardDef,
        K: EntityKind,
        P: Properties,
        F: Fn(&CollectionEvent<K, P>) + Send + Sync + 'static,
    {
        let callback: CollectionCallback<K, P> = Arc::new(callback);
        self.register::<CollectionChannel<K, P>>(def.descriptor(), |channel, id| {
            channel.collection.push((id, callback));
        })
    }

    /// Called when a publication adds, modifies or removes `entity`.
    ///
    /// The binding is dropped right after the entity's removal has been
    /// delivered.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the structure name is already subscribed
    /// under other types.
    pub fn on_entity<S, K, P, F>(
        &self,
        def: CollectionDef<S, K, P>,
        entity: Entity<K>,
        callback: F,
    ) -> EngineResult<Subscription>
    where
        S: ShardDef,
        K: EntityKind,
        P: Properties,
        F: Fn(Entity<K>, &CollectionChange<P>) + Send + Sync + 'static,
    {
        let callback: EntityCallback<K, P> = Arc::new(callback);
        self.register::<CollectionChannel<K, P>>(def.descriptor(), |channel, id| {
            channel
                .entities
                .entry(entity.id())
                .or_default()
                .push((id, callback));
        })
    }

    /// Called when a publication links or unlinks pairs of the relation.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the structure name is already subscribed
    /// under other types.
    pub fn on_relation<S, P, C, F>(
        &self,
        def: RelationDef<S, P, C>,
        callback: F,
    ) -> EngineResult<Subscription>
    where
        S: ShardDef,
        P: EntityKind,
        C: EntityKind,
        F: Fn(&RelationEvent<P, C>) + Send + Sync + 'static,
    {
        let callback: RelationCallback<P, C> = Arc::new(callback);
        self.register::<RelationChannel<P, C>>(def.descriptor(), |channel, id| {
            channel.subscribers.push((id, callback));
        })
    }

    fn register<T: Channel + Default + 'static>(
        &self,
        descriptor: StructureDescriptor,
        add: impl FnOnce(&mut T, u64),
    ) -> EngineResult<Subscription> {
        let key = channel_key(&descriptor);
        let mut registry = self.registry.lock();
        let id = registry.allocate(Location::Channel(key));
        match registry.channel::<T>(key) {
            Some(channel) => {
                add(channel, id);
                Ok(self.handle(id))
            }
            None => {
                registry.locations.remove(&id);
                Err(ModelError::TypeMismatch {
                    structure: descriptor.qualified_name(),
                }
                .into())
            }
        }
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.registry.lock().locations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs every subscriber of a publication, in registration order within
    /// each scope: model, then frames, then structures.
    ///
    /// A panicking subscriber is logged and skipped.
    pub(crate) fn dispatch(&self, publication: &Arc<Publication>) {
        let deliveries = self.registry.lock().prepare(publication);
        debug!(
            "Delivering publication {} to {} subscribers",
            publication.change_id,
            deliveries.len()
        );
        for delivery in deliveries {
            if catch_unwind(AssertUnwindSafe(delivery)).is_err() {
                warn!(
                    "Subscriber panicked while handling publication {}",
                    publication.change_id
                );
            }
        }
    }

    fn handle(&self, id: u64) -> Subscription {
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }
}

impl fmt::Debug for Subscriptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriptions")
            .field("len", &self.len())
            .finish()
    }
}

/// Keeps a subscription alive. Dropping the handle unsubscribes.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether the subscription still receives notifications.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| registry.lock().locations.contains_key(&self.id))
    }

    /// Unsubscribes now.
    pub fn dispose(self) {}

    /// Keeps the subscription registered for the life of the engine.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(self.id);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}
