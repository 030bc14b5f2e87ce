use crate::descriptor::{Cardinality, StructureDescriptor};
use crate::error::{ModelError, ModelResult};
use crate::records::{ChangeAction, ChangeRecord, RelationRow, StructureRows};
use crate::structure::Structure;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use tessera_types::{Entity, EntityId, EntityKind};

type Links = imbl::HashMap<EntityId, imbl::HashSet<EntityId>>;

/// Bidirectional mapping between parent and child entities.
///
/// Two directional maps (parent to children, child to parents) are kept in
/// step: a pair is linked iff it appears in both. The cardinality decides
/// whether either side may hold more than one value.
pub struct Relation<P, C> {
    descriptor: StructureDescriptor,
    cardinality: Cardinality,
    children: Links,
    parents: Links,
    pairs: usize,
    _kinds: PhantomData<fn() -> (P, C)>,
}

impl<P: EntityKind, C: EntityKind> Relation<P, C> {
    /// Creates an empty relation.
    ///
    /// The cardinality is taken from the descriptor; a collection descriptor
    /// yields a many-to-many relation.
    #[must_use]
    pub fn new(descriptor: StructureDescriptor) -> Self {
        Self {
            cardinality: descriptor.cardinality().unwrap_or(Cardinality::ManyToMany),
            descriptor,
            children: imbl::HashMap::new(),
            parents: imbl::HashMap::new(),
            pairs: 0,
            _kinds: PhantomData,
        }
    }

    #[must_use]
    pub fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    #[must_use]
    pub fn cardinality(&self) -> Cardinality {
        self.cardinality
    }

    /// Number of linked pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pairs
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pairs == 0
    }

    /// Whether the pair is linked.
    #[must_use]
    pub fn contains(&self, parent: Entity<P>, child: Entity<C>) -> bool {
        self.children
            .get(&parent.id())
            .is_some_and(|set| set.contains(&child.id()))
    }

    /// Children linked to a parent.
    pub fn children(&self, parent: Entity<P>) -> impl Iterator<Item = Entity<C>> + '_ {
        self.children
            .get(&parent.id())
            .into_iter()
            .flat_map(|set| set.iter().map(|id| Entity::from_id(*id)))
    }

    /// Parents linked to a child.
    pub fn parents(&self, child: Entity<C>) -> impl Iterator<Item = Entity<P>> + '_ {
        self.parents
            .get(&child.id())
            .into_iter()
            .flat_map(|set| set.iter().map(|id| Entity::from_id(*id)))
    }

    /// The single child of a parent, for one-to-one relations.
    #[must_use]
    pub fn child(&self, parent: Entity<P>) -> Option<Entity<C>> {
        self.children(parent).next()
    }

    /// The single parent of a child, for one-to-one and one-to-many relations.
    #[must_use]
    pub fn parent(&self, child: Entity<C>) -> Option<Entity<P>> {
        self.parents(child).next()
    }

    /// Iterates over all linked pairs, in no particular order.
    pub fn pairs(&self) -> impl Iterator<Item = (Entity<P>, Entity<C>)> + '_ {
        self.children.iter().flat_map(|(parent, set)| {
            set.iter()
                .map(move |child| (Entity::from_id(*parent), Entity::from_id(*child)))
        })
    }

    /// Links a pair.
    ///
    /// # Errors
    ///
    /// Returns `DuplicatedRelation` if the pair is already linked, or
    /// `CardinalityViolation` if either side already holds its only value.
    pub fn link(&mut self, parent: Entity<P>, child: Entity<C>) -> ModelResult<()> {
        let (p, c) = (parent.id(), child.id());
        if self.contains(parent, child) {
            return Err(ModelError::DuplicatedRelation {
                structure: self.descriptor.qualified_name(),
                parent: p.to_string(),
                child: c.to_string(),
            });
        }
        let parent_taken = self.children.get(&p).is_some_and(|s| !s.is_empty());
        let child_taken = self.parents.get(&c).is_some_and(|s| !s.is_empty());
        if (parent_taken && !self.cardinality.many_children())
            || (child_taken && !self.cardinality.many_parents())
        {
            return Err(ModelError::CardinalityViolation {
                structure: self.descriptor.qualified_name(),
                cardinality: self.cardinality.to_string(),
                parent: p.to_string(),
                child: c.to_string(),
            });
        }

        self.children.entry(p).or_default().insert(c);
        self.parents.entry(c).or_default().insert(p);
        self.pairs += 1;
        Ok(())
    }

    /// Unlinks a pair.
    ///
    /// # Errors
    ///
    /// Returns `MissingRelation` if the pair is not linked.
    pub fn unlink(&mut self, parent: Entity<P>, child: Entity<C>) -> ModelResult<()> {
        let (p, c) = (parent.id(), child.id());
        if !self.contains(parent, child) {
            return Err(ModelError::MissingRelation {
                structure: self.descriptor.qualified_name(),
                parent: p.to_string(),
                child: c.to_string(),
            });
        }

        Self::detach(&mut self.children, p, c);
        Self::detach(&mut self.parents, c, p);
        self.pairs -= 1;
        Ok(())
    }

    fn detach(links: &mut Links, key: EntityId, value: EntityId) {
        let now_empty = match links.get_mut(&key) {
            Some(set) => {
                set.remove(&value);
                set.is_empty()
            }
            None => false,
        };
        if now_empty {
            links.remove(&key);
        }
    }

    /// Checks that both directional maps describe the same pairs.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let forward: usize = self.children.values().map(|s| s.len()).sum();
        let backward: usize = self.parents.values().map(|s| s.len()).sum();
        forward == self.pairs
            && backward == self.pairs
            && self.children.iter().all(|(p, set)| {
                set.iter().all(|c| {
                    self.parents
                        .get(c)
                        .is_some_and(|parents| parents.contains(p))
                })
            })
    }
}

impl<P, C> Clone for Relation<P, C> {
    fn clone(&self) -> Self {
        Self {
            descriptor: self.descriptor,
            cardinality: self.cardinality,
            children: self.children.clone(),
            parents: self.parents.clone(),
            pairs: self.pairs,
            _kinds: PhantomData,
        }
    }
}

impl<P, C> fmt::Debug for Relation<P, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Relation")
            .field("structure", &self.descriptor.qualified_name())
            .field("cardinality", &self.cardinality)
            .field("pairs", &self.pairs)
            .finish()
    }
}

impl<P: EntityKind, C: EntityKind> Structure for Relation<P, C> {
    fn descriptor(&self) -> &StructureDescriptor {
        &self.descriptor
    }

    fn len(&self) -> usize {
        self.pairs
    }

    fn clone_structure(&self) -> Box<dyn Structure> {
        Box::new(self.clone())
    }

    fn clear(&mut self) {
        self.children = imbl::HashMap::new();
        self.parents = imbl::HashMap::new();
        self.pairs = 0;
    }

    fn load_rows(&mut self, rows: &StructureRows) -> ModelResult<()> {
        let StructureRows::Relation(rows) = rows else {
            return Err(ModelError::TypeMismatch {
                structure: self.descriptor.qualified_name(),
            });
        };
        for row in rows {
            self.link(Entity::from_id(row.parent), Entity::from_id(row.child))?;
        }
        Ok(())
    }

    fn apply_records(&mut self, records: &[ChangeRecord]) -> ModelResult<()> {
        for record in records {
            let child = record.related.ok_or_else(|| ModelError::InvalidRecord {
                structure: self.descriptor.qualified_name(),
                reason: "missing child id".to_string(),
            })?;
            let (parent, child) = (Entity::from_id(record.id), Entity::from_id(child));
            match record.action {
                ChangeAction::Link => self.link(parent, child)?,
                ChangeAction::Unlink => self.unlink(parent, child)?,
                ChangeAction::Add | ChangeAction::Remove | ChangeAction::Modify => {
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
            .pairs()
            .map(|(parent, child)| RelationRow {
                parent: parent.id(),
                child: child.id(),
            })
            .collect();
        Ok(StructureRows::Relation(rows))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
