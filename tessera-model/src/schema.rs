//! Static shard declarations.
//!
//! A shard is declared once, in code, by implementing [`ShardDef`]. The
//! typed handles [`CollectionDef`] and [`RelationDef`] are `const` values
//! that tie a structure name to its shard and its entity/property types, so
//! a lookup through a handle can never ask for the wrong types.
//!
//! ```ignore
//! struct Library;
//!
//! const BOOKS: CollectionDef<Library, Book, BookProps> = CollectionDef::new("books");
//! const WRITTEN_BY: RelationDef<Library, Author, Book> = RelationDef::one_to_many("written_by");
//!
//! impl ShardDef for Library {
//!     const NAME: &'static str = "library";
//!
//!     fn declare(schema: &mut ShardSchema<Self>) {
//!         schema.collection(BOOKS).relation(WRITTEN_BY);
//!     }
//! }
//! ```

use crate::collection::Collection;
use crate::descriptor::{Cardinality, StructureDescriptor};
use crate::error::{ModelError, ModelResult};
use crate::properties::Properties;
use crate::relation::Relation;
use crate::structure::Structure;
use std::fmt;
use std::marker::PhantomData;
use tessera_types::EntityKind;

/// A shard type: a named bundle of collections and relations.
pub trait ShardDef: Sized + Send + Sync + 'static {
    /// Stable shard name, used in descriptors and repository keys.
    const NAME: &'static str;

    /// Declares every structure of the shard.
    fn declare(schema: &mut ShardSchema<Self>);
}

/// Typed handle to a collection of `K` entities with `P` properties in shard `S`.
pub struct CollectionDef<S, K, P> {
    name: &'static str,
    _types: PhantomData<fn() -> (S, K, P)>,
}

impl<S, K, P> CollectionDef<S, K, P> {
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _types: PhantomData,
        }
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<S: ShardDef, K: EntityKind, P: Properties> CollectionDef<S, K, P> {
    #[must_use]
    pub fn descriptor(&self) -> StructureDescriptor {
        StructureDescriptor::collection(S::NAME, self.name, K::NAME, std::any::type_name::<P>())
    }
}

impl<S, K, P> Clone for CollectionDef<S, K, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, K, P> Copy for CollectionDef<S, K, P> {}

impl<S, K, P> fmt::Debug for CollectionDef<S, K, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CollectionDef").field(&self.name).finish()
    }
}

/// Typed handle to a relation from `P` parents to `C` children in shard `S`.
pub struct RelationDef<S, P, C> {
    name: &'static str,
    cardinality: Cardinality,
    _types: PhantomData<fn() -> (S, P, C)>,
}

impl<S, P, C> RelationDef<S, P, C> {
    #[must_use]
    pub const fn new(name: &'static str, cardinality: Cardinality) -> Self {
        Self {
            name,
            cardinality,
            _types: PhantomData,
        }
    }

    #[must_use]
    pub const fn one_to_one(name: &'static str) -> Self {
        Self::new(name, Cardinality::OneToOne)
    }

    #[must_use]
    pub const fn one_to_many(name: &'static str) -> Self {
        Self::new(name, Cardinality::OneToMany)
    }

    #[must_use]
    pub const fn many_to_many(name: &'static str) -> Self {
        Self::new(name, Cardinality::ManyToMany)
    }

    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    #[must_use]
    pub const fn cardinality(&self) -> Cardinality {
        self.cardinality
    }
}

impl<S: ShardDef, P: EntityKind, C: EntityKind> RelationDef<S, P, C> {
    #[must_use]
    pub fn descriptor(&self) -> StructureDescriptor {
        StructureDescriptor::relation(S::NAME, self.name, self.cardinality, P::NAME, C::NAME)
    }
}

impl<S, P, C> Clone for RelationDef<S, P, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S, P, C> Copy for RelationDef<S, P, C> {}

impl<S, P, C> fmt::Debug for RelationDef<S, P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RelationDef")
            .field(&self.name)
            .field(&self.cardinality)
            .finish()
    }
}

/// Collects the structures of one shard while [`ShardDef::declare`] runs.
pub struct ShardSchema<S> {
    structures: Vec<Box<dyn Structure>>,
    error: Option<ModelError>,
    _shard: PhantomData<fn() -> S>,
}

impl<S: ShardDef> ShardSchema<S> {
    pub(crate) fn new() -> Self {
        Self {
            structures: Vec::new(),
            error: None,
            _shard: PhantomData,
        }
    }

    /// Declares an empty collection.
    pub fn collection<K: EntityKind, P: Properties>(
        &mut self,
        def: CollectionDef<S, K, P>,
    ) -> &mut Self {
        self.push(Box::new(Collection::<K, P>::new(def.descriptor())))
    }

    /// Declares an empty relation.
    pub fn relation<P: EntityKind, C: EntityKind>(&mut self, def: RelationDef<S, P, C>) -> &mut Self {
        self.push(Box::new(Relation::<P, C>::new(def.descriptor())))
    }

    fn push(&mut self, structure: Box<dyn Structure>) -> &mut Self {
        let name = structure.descriptor().name;
        if self.structures.iter().any(|s| s.descriptor().name == name) {
            // First error wins; later declarations are still ignored.
            self.error.get_or_insert(ModelError::DuplicateStructure {
                structure: structure.descriptor().qualified_name(),
            });
            return self;
        }
        self.structures.push(structure);
        self
    }

    pub(crate) fn finish(self) -> ModelResult<Vec<Box<dyn Structure>>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.structures),
        }
    }
}
