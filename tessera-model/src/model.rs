use crate::collection::Collection;
use crate::descriptor::StructureDescriptor;
use crate::error::{ModelError, ModelResult};
use crate::properties::Properties;
use crate::relation::Relation;
use crate::schema::{CollectionDef, RelationDef, ShardDef};
use crate::shard::Shard;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tessera_types::EntityKind;

/// Immutable aggregate of read-only shards as of one point in time.
///
/// A model is never mutated after it is built. Edits produce a successor
/// through [`Model::successor`], which shares every shard it does not replace.
/// Cloning is cheap.
#[derive(Clone)]
pub struct Model {
    version: u64,
    shards: Vec<Arc<Shard>>,
    index: Arc<HashMap<TypeId, usize>>,
}

impl Model {
    /// Starts assembling a model from shard declarations.
    #[must_use]
    pub fn builder() -> ModelBuilder {
        ModelBuilder::default()
    }

    /// Increases by one on every successor. A freshly built model is version 0.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Looks up a shard by type.
    ///
    /// # Errors
    ///
    /// Returns `ShardNotFound` if `S` is not part of this model.
    pub fn shard<S: ShardDef>(&self) -> ModelResult<&Shard> {
        self.shard_arc::<S>().map(|shard| &**shard)
    }

    /// Like [`Model::shard`], returning the shared handle.
    ///
    /// # Errors
    ///
    /// Returns `ShardNotFound` if `S` is not part of this model.
    pub fn shard_arc<S: ShardDef>(&self) -> ModelResult<&Arc<Shard>> {
        self.shard_by_type(TypeId::of::<S>())
            .ok_or_else(|| ModelError::ShardNotFound {
                shard: S::NAME.to_string(),
            })
    }

    #[must_use]
    pub fn shard_by_type(&self, type_id: TypeId) -> Option<&Arc<Shard>> {
        self.index.get(&type_id).map(|&i| &self.shards[i])
    }

    /// Every shard, in registration order.
    #[must_use]
    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.shards
    }

    /// Typed collection lookup.
    ///
    /// # Errors
    ///
    /// Fails if the shard is not part of the model.
    pub fn collection<S: ShardDef, K: EntityKind, P: Properties>(
        &self,
        def: CollectionDef<S, K, P>,
    ) -> ModelResult<&Collection<K, P>> {
        self.shard::<S>()?.collection(def)
    }

    /// Typed relation lookup.
    ///
    /// # Errors
    ///
    /// Fails if the shard is not part of the model.
    pub fn relation<S: ShardDef, P: EntityKind, C: EntityKind>(
        &self,
        def: RelationDef<S, P, C>,
    ) -> ModelResult<&Relation<P, C>> {
        self.shard::<S>()?.relation(def)
    }

    /// Descriptors of every structure of every shard.
    pub fn descriptors(&self) -> impl Iterator<Item = StructureDescriptor> + '_ {
        self.shards.iter().flat_map(|s| s.descriptors())
    }

    /// Whether both models hold the very same instance of shard `S`.
    #[must_use]
    pub fn shares_shard<S: ShardDef>(&self, other: &Model) -> bool {
        match (self.shard_arc::<S>(), other.shard_arc::<S>()) {
            (Ok(a), Ok(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Builds the next model, replacing the given shards and sharing the rest.
    ///
    /// # Errors
    ///
    /// Returns `ShardNotFound` if a replacement has no counterpart here.
    pub fn successor(&self, replaced: impl IntoIterator<Item = Shard>) -> ModelResult<Model> {
        let mut shards = self.shards.clone();
        for shard in replaced {
            let i = self
                .index
                .get(&shard.type_id())
                .copied()
                .ok_or_else(|| ModelError::ShardNotFound {
                    shard: shard.name().to_string(),
                })?;
            shards[i] = Arc::new(shard);
        }
        Ok(Model {
            version: self.version + 1,
            shards,
            index: Arc::clone(&self.index),
        })
    }
}

impl fmt::Debug for Model {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Model")
            .field("version", &self.version)
            .field(
                "shards",
                &self.shards.iter().map(|s| s.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Statically composed list of shards.
///
/// The application registers each shard type once at startup.
#[derive(Default)]
pub struct ModelBuilder {
    shards: Vec<ModelResult<Shard>>,
}

impl ModelBuilder {
    #[must_use]
    pub fn with_shard<S: ShardDef>(mut self) -> Self {
        self.shards.push(Shard::of::<S>());
        self
    }

    /// Assembles the empty version-0 model.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateShard` if a shard type was registered twice, or the
    /// first declaration error of any shard.
    pub fn build(self) -> ModelResult<Model> {
        let mut shards = Vec::with_capacity(self.shards.len());
        let mut index = HashMap::new();
        for shard in self.shards {
            let shard = shard?;
            if index.insert(shard.type_id(), shards.len()).is_some() {
                return Err(ModelError::DuplicateShard {
                    shard: shard.name().to_string(),
                });
            }
            shards.push(Arc::new(shard));
        }
        Ok(Model {
            version: 0,
            shards,
            index: Arc::new(index),
        })
    }
}
