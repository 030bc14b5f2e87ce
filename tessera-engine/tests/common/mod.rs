#![allow(dead_code)]

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_engine::{Engine, EngineConfig};
use tessera_model::{CollectionDef, EntityKind, Model, RelationDef, ShardDef, ShardSchema};

/// Kind markers are bare tags with no derives.
pub struct Author;
impl EntityKind for Author {
    const NAME: &'static str = "author";
}

pub struct Book;
impl EntityKind for Book {
    const NAME: &'static str = "book";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named {
    pub name: String,
}

pub fn named(name: &str) -> Named {
    Named {
        name: name.to_string(),
    }
}

pub struct Library;

pub const AUTHORS: CollectionDef<Library, Author, Named> = CollectionDef::new("authors");
pub const BOOKS: CollectionDef<Library, Book, Named> = CollectionDef::new("books");
pub const WROTE: RelationDef<Library, Author, Book> = RelationDef::one_to_many("wrote");

impl ShardDef for Library {
    const NAME: &'static str = "library";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(AUTHORS).collection(BOOKS).relation(WROTE);
    }
}

pub struct Catalog;

pub const SHELVES: CollectionDef<Catalog, Book, Named> = CollectionDef::new("shelves");

impl ShardDef for Catalog {
    const NAME: &'static str = "catalog";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(SHELVES);
    }
}

pub fn library_model() -> Model {
    Model::builder()
        .with_shard::<Library>()
        .with_shard::<Catalog>()
        .build()
        .expect("library model")
}

pub fn start_engine() -> Engine {
    start_with(EngineConfig::named("test"))
}

pub fn start_with(config: EngineConfig) -> Engine {
    tessera_engine::logging::init_logging("tessera_engine=debug");
    Engine::start(library_model(), config).expect("engine start")
}

/// Collects values handed to a subscriber callback.
#[derive(Clone)]
pub struct Recorder<T> {
    seen: Arc<Mutex<Vec<T>>>,
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self {
        Self {
            seen: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, value: T) {
        self.seen.lock().push(value);
    }

    pub fn take(&self) -> Vec<T> {
        std::mem::take(&mut *self.seen.lock())
    }

    pub fn len(&self) -> usize {
        self.seen.lock().len()
    }
}
