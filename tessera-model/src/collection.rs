use crate::descriptor::StructureDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::properties::Properties;
use crate::records::{ChangeAction, ChangeRecord, CollectionRow, StructureRows};
use crate::structure::Structure;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use tessera_types::{Entity, EntityId, EntityKind};

/// Map from entity to its properties, for one entity type.
///
/// Every entity in a collection has exactly one properties value. The map
/// is persistent: cloning a collection is O(1) and the clone shares nodes
/// with the original until either side is written.
pub struct Collection<K, P> {
    descriptor: StructureDescriptor,
    items: imbl::HashMap<EntityId, P>,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind, P: Properties> Collection<K, P> {
    /// Creates an empty collection.
    #[must_use]
    pub fn new(descriptor: StructureDescriptor) -> Self {
        Self {
            descriptor,
            items: imbl::HashMap::new(),
            _kind: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the properties of an entity.
    #[must_use]
    pub fn get(&self, entity: Entity<K>) -> Option<&P> {
        self.items.get(&entity.id())
    }

    #[must_use]
    pub fn contains(&self, entity: Entity<K>) -> bool {
        self.items.contains_key(&entity.id())
    }

    /// Iterates over the entities in the collection, in no particular order.
    pub fn entities(&self) -> impl Iterator<Item = Entity<K>> + '_ {
        self.items.keys().map(|id| Entity::from_id(*id))
    }

    /// Iterates over entities and their properties, in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = (Entity<K>, &P)> + '_ {
        self.items.iter().map(|(id, p)| (Entity::from_id(*id), p))
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateKey` if the entity is already present.
    pub fn insert(&mut self, entity: Entity<K>, properties: P) -> ModelResult<()> {
        if self.items.contains_key(&entity.id()) {
            return Err(ModelError::DuplicateKey {
                structure: self.descriptor.qualified_name(),
                entity: entity.id().to_string(),
            });
        }
        self.items.insert(entity.id(), properties);
        Ok(())
    }

    /// Removes an entity and returns its last properties.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is absent.
    pub fn remove(&mut self, entity: Entity<K>) -> ModelResult<P> {
        self.items
            .remove(&entity.id())
            .ok_or_else(|| self.not_found(entity.id()))
    }

    /// Replaces the properties of an entity and returns the previous value.
    ///
    /// # Errors
    ///
    /// Returns `EntityNotFound` if the entity is absent.
    pub fn replace(&mut self, entity: Entity<K>, properties: P) -> ModelResult<P> {
        if !self.items.contains_key(&entity.id()) {
            return Err(self.not_found(entity.id()));
        }
        self.items
            .insert(entity.id(), properties)
            .ok_or_else(|| self.not_found(entity.id()))
    }

    fn not_found(&self, id: EntityId) -> ModelError {
        ModelError::EntityNotFound {
            structure: self.descriptor.qualified_name(),
            entity: id.to_string(),
        }
    }

    fn decode(&self, value: Option<&Value>, field: &str) -> ModelResult<P> {
        let value = value.ok_or_else(|| ModelError::InvalidRecord {
            structure: self.descriptor.qualified_name(),
            reason: format!("missing {field}"),
        })?;
        Ok(serde_json::from_value(value.clone())?)
    }
}

impl<K, P: Clone> Clone for Collection<K, P> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            items: self.items.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K, P> fmt::Debug for Collection<K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("structure", &self.descriptor.qualified_name())
            .field("len", &self.items.len())
            .finish()
    }
}

impl<K: EntityKind, P: Properties> Structure for Collection<K, P> {
    fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clone_structure(&self) -> Box<dyn Structure> {
        Box::new(self.clone())
    }

    fn clear(&mut self) {
        self.items = imbl::HashMap::new();
    }

    fn load_rows(&mut self, rows: &StructureRows) -> ModelResult<()> {
        let StructureRows::Collection(rows) = rows else {
            return Err(ModelError::TypeMismatch {
                structure: self.descriptor.qualified_name(),
            });
        };
        for row in rows {
            let properties: P = serde_json::from_value(row.data.clone())?;
            self.insert(Entity::from_id(row.id), properties)?;
        }
        Ok(())
    }

    fn apply_records(&mut self, records: &[ChangeRecord]) -> ModelResult<()> {
        for record in records {
            let entity = Entity::from_id(record.id);
            match record.action {
                ChangeAction::Add => {
                    let properties = self.decode(record.new_data.as_ref(), "new_data")?;
                    self.insert(entity, properties)?;
                }
                ChangeAction::Remove => {
                    self.remove(entity)?;
                }
                ChangeAction::Modify => {
                    let properties = self.decode(record.new_data.as_ref(), "new_data")?;
                    self.replace(entity, properties)?;
                }
                ChangeAction::Link | ChangeAction::Unlink => {
                    return Err(ModelError::UnsupportedAction {
                        structure: self.descriptor.qualified_name(),
                        action: record.action.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    fn to_rows(&self) -> ModelResult<StructureRows> {
        let rows = self
            .items
            .iter()
            .map(|(id, p)| {
                Ok(CollectionRow {
                    id: *id,
                    data: serde_json::to_value(p)?,
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(StructureRows::Collection(rows))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl<K, P: PartialEq + Clone> PartialEq for Collection<K, P> {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor && self.items == other.items
    }
}
