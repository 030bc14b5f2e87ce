use crate::collection::Collection;
use crate::descriptor::StructureDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::properties::Properties;
use crate::relation::Relation;
use crate::schema::{CollectionDef, RelationDef, ShardDef, ShardSchema};
use crate::structure::{Structure, downcast};
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tessera_types::EntityKind;

/// Read-only form of a shard.
///
/// Structures are held behind `Arc`, so two shards built from each other
/// share every structure that was not replaced.
#[derive(Clone)]
pub struct Shard {
    name: &'static str,
    type_id: TypeId,
    index: Arc<HashMap<&'static str, usize>>,
    structures: Vec<Arc<dyn Structure>>,
}

impl Shard {
    /// Builds the empty shard declared by `S`.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateStructure` if `S` declares a name twice.
    pub fn of<S: ShardDef>() -> ModelResult<Self> {
        let mut schema = ShardSchema::<S>::new();
        S::declare(&mut schema);
        let structures: Vec<Arc<dyn Structure>> =
            schema.finish()?.into_iter().map(Arc::from).collect();
        let index = structures
            .iter()
            .enumerate()
            .map(|(i, s)| (s.descriptor().name, i))
            .collect();
        Ok(Self {
            name: S::NAME,
            type_id: TypeId::of::<S>(),
            index: Arc::new(index),
            structures,
        })
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Whether this shard was declared by `S`.
    #[must_use]
    pub fn is<S: ShardDef>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    /// Index of a structure by name.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    /// Looks up a structure by name.
    ///
    /// # Errors
    ///
    /// Returns `StructureNotFound` if no structure has this name.
    pub fn structure(&self, name: &str) -> ModelResult<&dyn Structure> {
        self.position(name)
            .map(|i| self.structures[i].as_ref())
            .ok_or_else(|| ModelError::StructureNotFound {
                shard: self.name.to_string(),
                structure: name.to_string(),
            })
    }

    #[must_use]
    pub fn structure_at(&self, index: usize) -> Option<&Arc<dyn Structure>> {
        self.structures.get(index)
    }

    #[must_use]
    pub fn structures(&self) -> &[Arc<dyn Structure>] {
        &self.structures
    }

    /// Descriptors of every structure, in declaration order.
    pub fn descriptors(&self) -> impl Iterator<Item = StructureDescriptor> + '_ {
        self.structures.iter().map(|s| *s.descriptor())
    }

    /// Typed collection lookup.
    ///
    /// # Errors
    ///
    /// Fails if the handle belongs to another shard, or the name is unknown.
    pub fn collection<S: ShardDef, K: EntityKind, P: Properties>(
        &self,
        def: CollectionDef<S, K, P>,
    ) -> ModelResult<&Collection<K, P>> {
        self.check::<S>()?;
        downcast(self.structure(def.name())?)
    }

    /// Typed relation lookup.
    ///
    /// # Errors
    ///
    /// Fails if the handle belongs to another shard, or the name is unknown.
    pub fn relation<S: ShardDef, P: EntityKind, C: EntityKind>(
        &self,
        def: RelationDef<S, P, C>,
    ) -> ModelResult<&Relation<P, C>> {
        self.check::<S>()?;
        downcast(self.structure(def.name())?)
    }

    fn check<S: ShardDef>(&self) -> ModelResult<()> {
        if self.is::<S>() {
            Ok(())
        } else {
            Err(ModelError::ShardNotFound {
                shard: S::NAME.to_string(),
            })
        }
    }

    /// Returns a shard of the same type holding `structures` instead.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRecord` if the structures do not line up with the
    /// declared ones.
    pub fn with_structures(&self, structures: Vec<Arc<dyn Structure>>) -> ModelResult<Self> {
        let aligned = structures.len() == self.structures.len()
            && structures
                .iter()
                .zip(&self.structures)
                .all(|(new, old)| new.descriptor() == old.descriptor());
        if !aligned {
            return Err(ModelError::InvalidRecord {
                structure: self.name.to_string(),
                reason: "structures do not match the shard declaration".to_string(),
            });
        }
        Ok(Self {
            name: self.name,
            type_id: self.type_id,
            index: Arc::clone(&self.index),
            structures,
        })
    }

    /// Whether both shards hold the very same instance of a structure.
    #[must_use]
    pub fn shares_structure(&self, other: &Shard, name: &str) -> bool {
        match (self.position(name), other.position(name)) {
            (Some(a), Some(b)) => {
                std::ptr::addr_eq(Arc::as_ptr(&self.structures[a]), Arc::as_ptr(&other.structures[b]))
            }
            _ => false,
        }
    }
}

impl fmt::Debug for Shard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shard")
            .field("name", &self.name)
            .field("structures", &self.structures)
            .finish()
    }
}
