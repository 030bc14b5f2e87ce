//! Property-based tests for the change algebra.
//!
//! - Invert is an involution: invert(invert(c)) == c
//! - Invert undoes: apply(c) then apply(invert(c)) restores the base
//! - Merge is sequential composition: apply(merge(c1, c2)) == apply(c1); apply(c2)

use proptest::prelude::*;
use std::collections::BTreeMap;
use tessera_changes::{CollectionChanges, RelationChanges, TrackedCollection, TrackedRelation};
use tessera_model::{Cardinality, Collection, Relation, StructureDescriptor};
use tessera_types::{Entity, EntityId, EntityKind};

struct Item;
impl EntityKind for Item {
    const NAME: &'static str = "item";
}

const ITEMS: StructureDescriptor = StructureDescriptor::collection("props", "items", "item", "u32");
const LINKS: StructureDescriptor =
    StructureDescriptor::relation("props", "links", Cardinality::OneToMany, "item", "item");

// =============================================================================
// HELPERS
// =============================================================================

#[derive(Debug, Clone)]
enum Op {
    Add(u32),
    Remove(usize),
    Modify(usize, u32),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        any::<u32>().prop_map(Op::Add),
        any::<usize>().prop_map(Op::Remove),
        (any::<usize>(), any::<u32>()).prop_map(|(i, v)| Op::Modify(i, v)),
    ]
}

fn ops_strategy() -> impl Strategy<Value = Vec<Op>> {
    prop::collection::vec(op_strategy(), 0..24)
}

/// Ids are handed out from a counter so an id is never added twice.
struct Ids(u128);

impl Ids {
    fn next(&mut self) -> Entity<Item> {
        self.0 += 1;
        Entity::from_id(EntityId::from_u128(self.0))
    }
}

fn base(ids: &mut Ids, values: &[u32]) -> Collection<Item, u32> {
    let mut c = Collection::new(ITEMS);
    for v in values {
        c.insert(ids.next(), *v).unwrap();
    }
    c
}

fn run(target: &mut Collection<Item, u32>, ids: &mut Ids, ops: &[Op]) -> CollectionChanges<Item, u32> {
    let mut log = CollectionChanges::new(ITEMS);
    let mut tracked = TrackedCollection::new(target, Some(&mut log));
    for op in ops {
        let mut keys: Vec<_> = tracked.collection().entities().collect();
        keys.sort();
        match op {
            Op::Add(v) => tracked.insert(ids.next(), *v).unwrap(),
            Op::Remove(i) if !keys.is_empty() => {
                tracked.remove(keys[i % keys.len()]).unwrap();
            }
            Op::Modify(i, v) if !keys.is_empty() => {
                tracked.replace(keys[i % keys.len()], *v).unwrap();
            }
            _ => {}
        }
    }
    drop(tracked);
    log
}

fn contents(c: &Collection<Item, u32>) -> BTreeMap<Entity<Item>, u32> {
    c.iter().map(|(e, v)| (e, *v)).collect()
}

// =============================================================================
// COLLECTION PROPERTIES
// =============================================================================

proptest! {
    #[test]
    fn invert_is_an_involution(
        seed in prop::collection::vec(any::<u32>(), 0..8),
        ops in ops_strategy(),
    ) {
        let mut ids = Ids(0);
        let mut target = base(&mut ids, &seed);
        let changes = run(&mut target, &mut ids, &ops);

        prop_assert_eq!(changes.invert().invert(), changes);
    }

    #[test]
    fn invert_restores_base(
        seed in prop::collection::vec(any::<u32>(), 0..8),
        ops in ops_strategy(),
    ) {
        let mut ids = Ids(0);
        let original = base(&mut ids, &seed);
        let mut target = original.clone();
        let changes = run(&mut target, &mut ids, &ops);

        changes.invert().apply(&mut target, None).unwrap();
        prop_assert_eq!(contents(&target), contents(&original));
    }

    #[test]
    fn apply_reproduces_tracked_result(
        seed in prop::collection::vec(any::<u32>(), 0..8),
        ops in ops_strategy(),
    ) {
        let mut ids = Ids(0);
        let original = base(&mut ids, &seed);
        let mut tracked = original.clone();
        let changes = run(&mut tracked, &mut ids, &ops);

        let mut replayed = original.clone();
        changes.apply(&mut replayed, None).unwrap();
        prop_assert_eq!(contents(&replayed), contents(&tracked));
    }

    #[test]
    fn merge_equals_sequential_apply(
        seed in prop::collection::vec(any::<u32>(), 0..8),
        first in ops_strategy(),
        second in ops_strategy(),
    ) {
        let mut ids = Ids(0);
        let original = base(&mut ids, &seed);
        let mut sequential = original.clone();
        let c1 = run(&mut sequential, &mut ids, &first);
        let c2 = run(&mut sequential, &mut ids, &second);

        let merged = c1.merge(&c2).unwrap();
        let mut combined = original.clone();
        merged.apply(&mut combined, None).unwrap();

        prop_assert_eq!(contents(&combined), contents(&sequential));
    }
}

// =============================================================================
// RELATION PROPERTIES
// =============================================================================

fn run_links(
    target: &mut Relation<Item, Item>,
    pairs: &[(u8, u8)],
) -> RelationChanges<Item, Item> {
    let mut log = RelationChanges::new(LINKS);
    let mut tracked = TrackedRelation::new(target, Some(&mut log));
    for (p, c) in pairs {
        let parent = Entity::from_id(EntityId::from_u128(u128::from(*p % 4)));
        let child = Entity::from_id(EntityId::from_u128(100 + u128::from(*c % 6)));
        // Toggle the pair; cardinality failures leave both sides untouched.
        if tracked.relation().contains(parent, child) {
            tracked.unlink(parent, child).unwrap();
        } else {
            let _ = tracked.link(parent, child);
        }
    }
    drop(tracked);
    log
}

fn pairs_of(r: &Relation<Item, Item>) -> Vec<(Entity<Item>, Entity<Item>)> {
    let mut pairs: Vec<_> = r.pairs().collect();
    pairs.sort();
    pairs
}

proptest! {
    #[test]
    fn relation_invert_restores_base(
        before in prop::collection::vec((any::<u8>(), any::<u8>()), 0..12),
        during in prop::collection::vec((any::<u8>(), any::<u8>()), 0..24),
    ) {
        let mut target = Relation::new(LINKS);
        run_links(&mut target, &before);
        let original = target.clone();

        let changes = run_links(&mut target, &during);
        changes.invert().apply(&mut target, None).unwrap();

        prop_assert_eq!(pairs_of(&target), pairs_of(&original));
        prop_assert!(target.is_consistent());
    }

    #[test]
    fn relation_merge_equals_sequential_apply(
        first in prop::collection::vec((any::<u8>(), any::<u8>()), 0..16),
        second in prop::collection::vec((any::<u8>(), any::<u8>()), 0..16),
    ) {
        let mut sequential = Relation::new(LINKS);
        let c1 = run_links(&mut sequential, &first);
        let c2 = run_links(&mut sequential, &second);

        let mut combined = Relation::new(LINKS);
        c1.merge(&c2).unwrap().apply(&mut combined, None).unwrap();

        prop_assert_eq!(pairs_of(&combined), pairs_of(&sequential));
    }
}
