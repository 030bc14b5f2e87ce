use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tessera_model::{
    Cardinality, CollectionDef, Entity, EntityKind, Model, ModelError, RelationDef, Shard,
    ShardDef, ShardSchema, Structure, StructureKind,
};

struct Author;
impl EntityKind for Author {
    const NAME: &'static str = "author";
}

struct Book;
impl EntityKind for Book {
    const NAME: &'static str = "book";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Named {
    name: String,
}

struct Library;

const AUTHORS: CollectionDef<Library, Author, Named> = CollectionDef::new("authors");
const BOOKS: CollectionDef<Library, Book, Named> = CollectionDef::new("books");
const WROTE: RelationDef<Library, Author, Book> = RelationDef::one_to_many("wrote");

impl ShardDef for Library {
    const NAME: &'static str = "library";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(AUTHORS).collection(BOOKS).relation(WROTE);
    }
}

struct Tags;

const TAGS: CollectionDef<Tags, Book, Named> = CollectionDef::new("tags");

impl ShardDef for Tags {
    const NAME: &'static str = "tags";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(TAGS);
    }
}

struct Broken;

impl ShardDef for Broken {
    const NAME: &'static str = "broken";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema
            .collection(CollectionDef::<Self, Book, Named>::new("twice"))
            .collection(CollectionDef::<Self, Author, Named>::new("twice"));
    }
}

fn model() -> Model {
    Model::builder()
        .with_shard::<Library>()
        .with_shard::<Tags>()
        .build()
        .unwrap()
}

// ── Declarations ─────────────────────────────────────────────────

#[test]
fn shard_declares_structures_in_order() {
    let shard = Shard::of::<Library>().unwrap();
    let names: Vec<_> = shard.descriptors().map(|d| d.name).collect();
    assert_eq!(names, vec!["authors", "books", "wrote"]);
    assert!(shard.is::<Library>());
    assert!(!shard.is::<Tags>());
}

#[test]
fn descriptors_carry_names_and_types() {
    let books = BOOKS.descriptor();
    assert_eq!(books.shard, "library");
    assert_eq!(books.key_type, "book");
    assert_eq!(books.to_string(), "library.books");
    assert!(books.is_collection());

    let wrote = WROTE.descriptor();
    assert_eq!(
        wrote.kind,
        StructureKind::Relation {
            cardinality: Cardinality::OneToMany
        }
    );
    assert_eq!((wrote.key_type, wrote.value_type), ("author", "book"));
}

#[test]
fn duplicate_structure_name_fails() {
    let err = Shard::of::<Broken>().unwrap_err();
    assert!(matches!(err, ModelError::DuplicateStructure { .. }));
}

#[test]
fn duplicate_shard_fails() {
    let err = Model::builder()
        .with_shard::<Library>()
        .with_shard::<Library>()
        .build()
        .unwrap_err();
    assert!(matches!(err, ModelError::DuplicateShard { .. }));
}

// ── Lookup ───────────────────────────────────────────────────────

#[test]
fn lookup_by_shard_type() {
    let m = model();
    assert_eq!(m.version(), 0);
    assert_eq!(m.shard::<Library>().unwrap().name(), "library");
    assert!(m.collection(BOOKS).unwrap().is_empty());
    assert!(m.relation(WROTE).unwrap().is_empty());
    assert_eq!(m.descriptors().count(), 4);
}

#[test]
fn missing_shard_is_reported() {
    let m = Model::builder().with_shard::<Library>().build().unwrap();
    assert!(matches!(
        m.shard::<Tags>().unwrap_err(),
        ModelError::ShardNotFound { .. }
    ));
    assert!(m.collection(TAGS).is_err());
}

#[test]
fn structure_lookup_by_name() {
    let shard = Shard::of::<Library>().unwrap();
    assert_eq!(shard.structure("wrote").unwrap().descriptor().name, "wrote");
    assert!(matches!(
        shard.structure("nope").unwrap_err(),
        ModelError::StructureNotFound { .. }
    ));
}

// ── Successors ───────────────────────────────────────────────────

#[test]
fn successor_shares_untouched_shards() {
    let m = model();
    let library = m.shard::<Library>().unwrap();

    let mut books = m.collection(BOOKS).unwrap().clone();
    books
        .insert(Entity::new(), Named { name: "Dune".into() })
        .unwrap();
    let position = library.position("books").unwrap();
    let mut structures = library.structures().to_vec();
    structures[position] = Arc::new(books) as Arc<dyn Structure>;
    let replaced = library.with_structures(structures).unwrap();

    let next = m.successor([replaced]).unwrap();

    assert_eq!(next.version(), 1);
    assert!(next.shares_shard::<Tags>(&m));
    assert!(!next.shares_shard::<Library>(&m));
    let next_library = next.shard::<Library>().unwrap();
    assert!(next_library.shares_structure(library, "authors"));
    assert!(!next_library.shares_structure(library, "books"));
    assert_eq!(next.collection(BOOKS).unwrap().len(), 1);
    assert!(m.collection(BOOKS).unwrap().is_empty());
}

#[test]
fn with_structures_rejects_misaligned_list() {
    let shard = Shard::of::<Library>().unwrap();
    let mut structures = shard.structures().to_vec();
    structures.swap(0, 2);
    assert!(shard.with_structures(structures).is_err());
    assert!(shard.with_structures(Vec::new()).is_err());
}

#[test]
fn successor_rejects_foreign_shard() {
    let m = Model::builder().with_shard::<Library>().build().unwrap();
    let err = m.successor([Shard::of::<Tags>().unwrap()]).unwrap_err();
    assert!(matches!(err, ModelError::ShardNotFound { .. }));
}
