use pretty_assertions::assert_eq;
use serde::{Deserialize, Serialize};
use tessera_changes::{ChangeError, ChangesFrame, CollectionChange, ModelChanges};
use tessera_model::{CollectionDef, Model, RelationDef, ShardDef, ShardSchema};
use tessera_types::{Entity, EntityKind};

struct Card;
impl EntityKind for Card {
    const NAME: &'static str = "card";
}

struct Column;
impl EntityKind for Column {
    const NAME: &'static str = "column";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Title(String);

struct Board;

const CARDS: CollectionDef<Board, Card, Title> = CollectionDef::new("cards");
const COLUMNS: CollectionDef<Board, Column, Title> = CollectionDef::new("columns");
const PLACED: RelationDef<Board, Column, Card> = RelationDef::one_to_many("placed");

impl ShardDef for Board {
    const NAME: &'static str = "board";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(CARDS).collection(COLUMNS).relation(PLACED);
    }
}

struct Archive;

const ARCHIVED: CollectionDef<Archive, Card, Title> = CollectionDef::new("archived");

impl ShardDef for Archive {
    const NAME: &'static str = "archive";

    fn declare(schema: &mut ShardSchema<Self>) {
        schema.collection(ARCHIVED);
    }
}

fn title(s: &str) -> Title {
    Title(s.to_string())
}

fn modify(card: Entity<Card>, old: &str, new: &str) -> ModelChanges {
    let mut frame = ChangesFrame::for_shard::<Board>();
    frame
        .collection_mut(CARDS)
        .unwrap()
        .record_modify(card, title(old), title(new))
        .unwrap();
    frame.into()
}

// ── Frames ───────────────────────────────────────────────────────

#[test]
fn empty_changes_have_no_changes() {
    assert!(!ModelChanges::new().has_changes());
    assert!(!ChangesFrame::for_shard::<Board>().has_changes());
}

#[test]
fn frame_with_cancelled_set_has_no_changes() {
    let mut frame = ChangesFrame::for_shard::<Board>();
    let card = Entity::<Card>::new();
    let cards = frame.collection_mut(CARDS).unwrap();
    cards.record_add(card, title("a")).unwrap();
    cards.record_remove(card, title("a")).unwrap();

    assert_eq!(frame.sets().len(), 1);
    assert!(!frame.has_changes());
    assert!(frame.to_records().unwrap().is_empty());
}

#[test]
fn discard_empty_drops_only_empty_sets() {
    let mut frame = ChangesFrame::for_shard::<Board>();
    let (column, card) = (Entity::<Column>::new(), Entity::<Card>::new());
    frame.collection_mut(COLUMNS).unwrap();
    frame.collection_mut(CARDS).unwrap().record_add(card, title("c")).unwrap();
    frame.relation_mut(PLACED).unwrap().record_link(column, card).unwrap();

    assert!(!frame.discard_empty("cards"));
    assert!(!frame.discard_empty("missing"));
    assert!(frame.discard_empty("columns"));

    assert_eq!(frame.sets().len(), 2);
    assert!(frame.get("columns").is_none());
    // Lookups still resolve after the remaining sets shift.
    assert_eq!(frame.collection(CARDS).unwrap().map(|c| c.len()), Some(1));
    assert_eq!(frame.relation(PLACED).unwrap().map(|r| r.len()), Some(1));
}

#[test]
fn typed_lookup_through_frame() {
    let mut frame = ChangesFrame::for_shard::<Board>();
    let (column, card) = (Entity::<Column>::new(), Entity::<Card>::new());
    frame.collection_mut(CARDS).unwrap().record_add(card, title("c")).unwrap();
    frame.relation_mut(PLACED).unwrap().record_link(column, card).unwrap();

    assert!(frame.is::<Board>());
    assert!(frame.collection(COLUMNS).unwrap().is_none());
    assert_eq!(frame.collection(CARDS).unwrap().map(|c| c.len()), Some(1));
    assert_eq!(frame.relation(PLACED).unwrap().map(|r| r.len()), Some(1));
    assert_eq!(frame.get("cards").map(|set| set.len()), Some(1));
}

#[test]
fn frame_rejects_handle_of_other_shard() {
    let mut frame = ChangesFrame::for_shard::<Board>();
    let err = frame.collection_mut(ARCHIVED).unwrap_err();
    assert!(matches!(err, ChangeError::TypeMismatch { .. }));
}

#[test]
fn frame_lookup_by_shard_type() {
    let mut board = ChangesFrame::for_shard::<Board>();
    board.collection_mut(CARDS).unwrap().record_add(Entity::new(), title("x")).unwrap();
    let changes = ModelChanges::from_frames(vec![board, ChangesFrame::for_shard::<Archive>()]);

    assert!(changes.frame::<Board>().unwrap().has_changes());
    assert!(!changes.frame::<Archive>().unwrap().has_changes());
    assert!(changes.has_changes());
    assert!(changes.collection(ARCHIVED).unwrap().is_none());
}

// ── Invert / merge across the model ──────────────────────────────

#[test]
fn two_commands_modifying_one_entity_merge_to_one_modify() {
    let card = Entity::<Card>::new();
    let first = modify(card, "draft", "review");
    let second = modify(card, "review", "done");

    let merged = first.merge(&second).unwrap();
    let cards = merged.collection(CARDS).unwrap().unwrap();

    assert_eq!(cards.len(), 1);
    assert_eq!(
        cards.get(card),
        Some(&CollectionChange::Modified {
            old: title("draft"),
            new: title("done"),
        })
    );
}

#[test]
fn merge_appends_frames_of_new_shards() {
    let card = Entity::<Card>::new();
    let mut archive = ChangesFrame::for_shard::<Archive>();
    archive
        .collection_mut(ARCHIVED)
        .unwrap()
        .record_add(card, title("old"))
        .unwrap();

    let merged = modify(card, "a", "b").merge(&archive.into()).unwrap();
    assert_eq!(merged.frames().len(), 2);
    assert_eq!(merged.collection(ARCHIVED).unwrap().map(|c| c.len()), Some(1));
}

#[test]
fn merge_all_folds_in_order() {
    let card = Entity::<Card>::new();
    let steps = [modify(card, "1", "2"), modify(card, "2", "3"), modify(card, "3", "4")];

    let merged = ModelChanges::merge_all(&steps).unwrap();
    assert_eq!(
        merged.collection(CARDS).unwrap().unwrap().get(card),
        Some(&CollectionChange::Modified {
            old: title("1"),
            new: title("4"),
        })
    );
}

#[test]
fn merge_of_discontinuous_commands_fails() {
    let card = Entity::<Card>::new();
    let err = modify(card, "a", "b").merge(&modify(card, "x", "y")).unwrap_err();
    assert!(matches!(err, ChangeError::InvalidChangeSequence { .. }));
}

#[test]
fn invert_then_apply_restores_model_structure() {
    let model = Model::builder().with_shard::<Board>().build().unwrap();
    let shard = model.shard::<Board>().unwrap();
    let position = shard.position("cards").unwrap();
    let mut cards = shard.structure_at(position).unwrap().clone_structure();

    let card = Entity::<Card>::new();
    let mut frame = ChangesFrame::for_shard::<Board>();
    frame.collection_mut(CARDS).unwrap().record_add(card, title("a")).unwrap();
    let changes = ModelChanges::from(frame);

    let set = changes.frames()[0].get("cards").unwrap();
    set.apply_to(cards.as_mut(), None).unwrap();
    assert_eq!(cards.len(), 1);

    let inverse = changes.invert();
    inverse.frames()[0]
        .get("cards")
        .unwrap()
        .apply_to(cards.as_mut(), None)
        .unwrap();
    assert!(cards.is_empty());
}

#[test]
fn erased_apply_rejects_wrong_structure() {
    let model = Model::builder().with_shard::<Board>().build().unwrap();
    let shard = model.shard::<Board>().unwrap();
    let mut placed = shard
        .structure_at(shard.position("placed").unwrap())
        .unwrap()
        .clone_structure();

    let changes = modify(Entity::new(), "a", "b");
    let err = changes.frames()[0]
        .get("cards")
        .unwrap()
        .apply_to(placed.as_mut(), None)
        .unwrap_err();
    assert!(matches!(err, ChangeError::Model(_)));
}

#[test]
fn to_records_lists_each_structure() {
    let (column, card) = (Entity::<Column>::new(), Entity::<Card>::new());
    let mut frame = ChangesFrame::for_shard::<Board>();
    frame.collection_mut(CARDS).unwrap().record_add(card, title("c")).unwrap();
    frame.relation_mut(PLACED).unwrap().record_link(column, card).unwrap();

    let records = ModelChanges::from(frame).to_records().unwrap();
    let names: Vec<_> = records.iter().map(|r| r.structure.as_str()).collect();
    assert_eq!(names, vec!["cards", "placed"]);
}
