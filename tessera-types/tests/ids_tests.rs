use proptest::prelude::*;
use std::collections::HashSet;
use std::str::FromStr;
use tessera_types::{ChangeId, Entity, EntityId, EntityKind};

struct Book;
impl EntityKind for Book {
    const NAME: &'static str = "book";
}

struct Author;
impl EntityKind for Author {
    const NAME: &'static str = "author";
}

// ── EntityId ──────────────────────────────────────────────────────

#[test]
fn entity_id_new_is_unique() {
    let a = EntityId::new();
    let b = EntityId::new();
    assert_ne!(a, b);
}

#[test]
fn entity_id_from_uuid_roundtrip() {
    let uuid = uuid::Uuid::now_v7();
    let id = EntityId::from_uuid(uuid);
    assert_eq!(id.as_uuid(), uuid);
}

#[test]
fn entity_id_from_u128_is_stable() {
    assert_eq!(EntityId::from_u128(7), EntityId::from_u128(7));
    assert_ne!(EntityId::from_u128(7), EntityId::from_u128(8));
}

#[test]
fn entity_id_display_and_parse() {
    let id = EntityId::new();
    let parsed = EntityId::parse(&id.to_string()).unwrap();
    assert_eq!(id, parsed);
}

#[test]
fn entity_id_from_str_invalid() {
    assert!(matches!(
        EntityId::from_str("garbage"),
        Err(tessera_types::Error::InvalidUuid(_))
    ));
    assert!(matches!(
        EntityId::parse("not-a-uuid"),
        Err(tessera_types::Error::InvalidUuid(_))
    ));
}

#[test]
fn entity_ids_are_time_ordered() {
    let a = EntityId::new();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = EntityId::new();
    assert!(a < b);
}

#[test]
fn entity_id_serialization_roundtrip() {
    let id = EntityId::new();
    let json = serde_json::to_string(&id).unwrap();
    let parsed: EntityId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, parsed);
}

// ── Entity<K> ─────────────────────────────────────────────────────

#[test]
fn typed_entity_wraps_id() {
    let id = EntityId::new();
    let book = Entity::<Book>::from_id(id);
    assert_eq!(book.id(), id);
    assert_eq!(EntityId::from(book), id);
}

#[test]
fn typed_entity_equality_follows_id() {
    let id = EntityId::new();
    let a = Entity::<Book>::from_id(id);
    let b = Entity::<Book>::from_id(id);
    assert_eq!(a, b);
    assert_ne!(a, Entity::<Book>::new());

    let mut set = HashSet::new();
    set.insert(a);
    set.insert(b);
    assert_eq!(set.len(), 1);
}

#[test]
fn typed_entity_display_includes_kind() {
    let author = Entity::<Author>::new();
    let shown = author.to_string();
    assert!(shown.starts_with("author:"));
    assert!(format!("{:?}", author).starts_with("author("));
}

#[test]
fn typed_entity_serializes_as_bare_uuid() {
    let book = Entity::<Book>::new();
    let json = serde_json::to_string(&book).unwrap();
    assert_eq!(json, serde_json::to_string(&book.id()).unwrap());

    let parsed: Entity<Book> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, book);
}

// ── ChangeId ──────────────────────────────────────────────────────

#[test]
fn change_id_next_is_greater() {
    let id = ChangeId::ZERO;
    assert_eq!(id.next().value(), 1);
    assert!(id.next() > id);
}

#[test]
fn change_id_display_and_parse() {
    let id = ChangeId::new(42);
    assert_eq!(id.to_string(), "#42");
    assert_eq!(ChangeId::from_str("#42").unwrap(), id);
    assert_eq!(ChangeId::from_str("42").unwrap(), id);
    assert!(ChangeId::from_str("#forty").is_err());
}

proptest! {
    #[test]
    fn change_id_order_matches_raw_order(a in any::<u64>(), b in any::<u64>()) {
        prop_assert_eq!(ChangeId::new(a) < ChangeId::new(b), a < b);
    }

    #[test]
    fn entity_id_roundtrips_through_text(raw in any::<u128>()) {
        let id = EntityId::from_u128(raw);
        prop_assert_eq!(EntityId::parse(&id.to_string()).unwrap(), id);
    }
}
