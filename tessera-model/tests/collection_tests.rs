use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tessera_model::{
    ChangeRecord, Collection, CollectionRow, Entity, EntityId, EntityKind, ModelError,
    StructureDescriptor, StructureRows, Structure,
};

struct Note;
impl EntityKind for Note {
    const NAME: &'static str = "note";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct NoteProps {
    title: String,
}

fn props(title: &str) -> NoteProps {
    NoteProps {
        title: title.to_string(),
    }
}

fn notes() -> Collection<Note, NoteProps> {
    Collection::new(StructureDescriptor::collection(
        "notebook",
        "notes",
        Note::NAME,
        "NoteProps",
    ))
}

// ── Basic map operations ─────────────────────────────────────────

#[test]
fn insert_and_get() {
    let mut c = notes();
    let e = Entity::<Note>::new();
    c.insert(e, props("a")).unwrap();

    assert_eq!(c.get(e), Some(&props("a")));
    assert!(c.contains(e));
    assert_eq!(c.len(), 1);
}

#[test]
fn insert_duplicate_fails() {
    let mut c = notes();
    let e = Entity::<Note>::new();
    c.insert(e, props("a")).unwrap();

    let err = c.insert(e, props("b")).unwrap_err();
    assert!(matches!(err, ModelError::DuplicateKey { .. }));
    assert_eq!(c.get(e), Some(&props("a")));
}

#[test]
fn remove_returns_last_value() {
    let mut c = notes();
    let e = Entity::<Note>::new();
    c.insert(e, props("a")).unwrap();

    assert_eq!(c.remove(e).unwrap(), props("a"));
    assert!(c.is_empty());
    assert!(matches!(
        c.remove(e).unwrap_err(),
        ModelError::EntityNotFound { .. }
    ));
}

#[test]
fn replace_requires_existing_entity() {
    let mut c = notes();
    let e = Entity::<Note>::new();
    assert!(c.replace(e, props("x")).is_err());

    c.insert(e, props("a")).unwrap();
    assert_eq!(c.replace(e, props("b")).unwrap(), props("a"));
    assert_eq!(c.get(e), Some(&props("b")));
}

#[test]
fn entities_lists_every_key() {
    let mut c = notes();
    let mut ids: Vec<Entity<Note>> = (0..5).map(|_| Entity::new()).collect();
    for (i, e) in ids.iter().enumerate() {
        c.insert(*e, props(&i.to_string())).unwrap();
    }

    let mut listed: Vec<_> = c.entities().collect();
    listed.sort();
    ids.sort();
    assert_eq!(listed, ids);
    assert_eq!(c.iter().count(), 5);
}

// ── Structural sharing ───────────────────────────────────────────

#[test]
fn clone_is_independent() {
    let mut original = notes();
    let e = Entity::<Note>::new();
    original.insert(e, props("a")).unwrap();

    let mut copy = original.clone();
    copy.replace(e, props("b")).unwrap();
    copy.insert(Entity::new(), props("c")).unwrap();

    assert_eq!(original.get(e), Some(&props("a")));
    assert_eq!(original.len(), 1);
    assert_eq!(copy.len(), 2);
}

// ── Erased structure interface ───────────────────────────────────

#[test]
fn rows_round_trip_through_load() {
    let mut c = notes();
    let e = Entity::<Note>::new();
    c.insert(e, props("a")).unwrap();

    let rows = c.to_rows().unwrap();
    assert_eq!(
        rows,
        StructureRows::Collection(vec![CollectionRow {
            id: e.id(),
            data: json!({ "title": "a" }),
        }])
    );

    let mut loaded = notes();
    loaded.load_rows(&rows).unwrap();
    assert_eq!(loaded.get(e), Some(&props("a")));
}

#[test]
fn load_rejects_relation_rows() {
    let mut c = notes();
    let err = c.load_rows(&StructureRows::Relation(Vec::new())).unwrap_err();
    assert!(matches!(err, ModelError::TypeMismatch { .. }));
}

#[test]
fn apply_records_in_order() {
    let mut c = notes();
    let id = EntityId::new();

    c.apply_records(&[
        ChangeRecord::add(id, json!({ "title": "a" })),
        ChangeRecord::modify(id, json!({ "title": "a" }), json!({ "title": "b" })),
    ])
    .unwrap();
    assert_eq!(c.get(Entity::from_id(id)), Some(&props("b")));

    c.apply_records(&[ChangeRecord::remove(id, json!({ "title": "b" }))])
        .unwrap();
    assert!(c.is_empty());
}

#[test]
fn apply_link_record_is_unsupported() {
    let mut c = notes();
    let err = c
        .apply_records(&[ChangeRecord::link(EntityId::new(), EntityId::new())])
        .unwrap_err();
    assert!(matches!(err, ModelError::UnsupportedAction { .. }));
}

#[test]
fn apply_add_without_data_is_invalid() {
    let mut c = notes();
    let mut record = ChangeRecord::add(EntityId::new(), json!({ "title": "a" }));
    record.new_data = None;

    let err = c.apply_records(&[record]).unwrap_err();
    assert!(matches!(err, ModelError::InvalidRecord { .. }));
}

#[test]
fn apply_malformed_data_is_serialization_error() {
    let mut c = notes();
    let err = c
        .apply_records(&[ChangeRecord::add(EntityId::new(), json!({ "nope": 1 }))])
        .unwrap_err();
    assert!(matches!(err, ModelError::Serialization(_)));
}
