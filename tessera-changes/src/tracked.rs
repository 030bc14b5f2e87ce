//! Decorators that write to a structure and log what they did.
//!
//! With no log attached the decorators only forward, which is how an
//! untracked snapshot writes.

use crate::collection_changes::{CollectionChange, CollectionChanges};
use crate::error::ChangeResult;
use crate::relation_changes::RelationChanges;
use tessera_model::{Collection, EntityKind, ModelError, Properties, Relation};
use tessera_types::Entity;

pub struct TrackedCollection<'a, K, P> {
    target: &'a mut Collection<K, P>,
    log: Option<&'a mut CollectionChanges<K, P>>,
}

impl<'a, K: EntityKind, P: Properties> TrackedCollection<'a, K, P> {
    pub fn new(target: &'a mut Collection<K, P>, log: Option<&'a mut CollectionChanges<K, P>>) -> Self {
        Self { target, log }
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.log.is_some()
    }

    #[must_use]
    pub fn get(&self, entity: Entity<K>) -> Option<&P> {
        self.target.get(entity)
    }

    #[must_use]
    pub fn contains(&self, entity: Entity<K>) -> bool {
        self.target.contains(entity)
    }

    #[must_use]
    pub fn collection(&self) -> &Collection<K, P> {
        &*self.target
    }

    /// Inserts a new entity.
    ///
    /// # Errors
    ///
    /// Fails with `DuplicateKey`, or when the log rejects the sequence. The
    /// collection is untouched on error.
    pub fn insert(&mut self, entity: Entity<K>, properties: P) -> ChangeResult<()> {
        if self.target.contains(entity) {
            return Err(ModelError::DuplicateKey {
                structure: self.target.descriptor().qualified_name(),
                entity: entity.id().to_string(),
            }
            .into());
        }
        if let Some(log) = self.log.as_deref_mut() {
            log.record_add(entity, properties.clone())?;
        }
        self.target.insert(entity, properties)?;
        Ok(())
    }

    /// Removes an entity and returns its last properties.
    ///
    /// # Errors
    ///
    /// Fails with `EntityNotFound`, or when the log rejects the sequence.
    pub fn remove(&mut self, entity: Entity<K>) -> ChangeResult<P> {
        let old = self.current(entity)?;
        if let Some(log) = self.log.as_deref_mut() {
            log.record_remove(entity, old)?;
        }
        Ok(self.target.remove(entity)?)
    }

    /// Replaces the properties of an entity and returns the previous value.
    ///
    /// # Errors
    ///
    /// Fails with `EntityNotFound`, or when the log rejects the sequence.
    pub fn replace(&mut self, entity: Entity<K>, properties: P) -> ChangeResult<P> {
        let old = self.current(entity)?;
        if let Some(log) = self.log.as_deref_mut() {
            log.record(
                entity.id(),
                CollectionChange::Modified {
                    old,
                    new: properties.clone(),
                },
            )?;
        }
        Ok(self.target.replace(entity, properties)?)
    }

    /// Replaces the properties of an entity with `f` applied to the current ones.
    ///
    /// # Errors
    ///
    /// Fails with `EntityNotFound`, or when the log rejects the sequence.
    pub fn modify(&mut self, entity: Entity<K>, f: impl FnOnce(&P) -> P) -> ChangeResult<()> {
        let next = f(&self.current(entity)?);
        self.replace(entity, next)?;
        Ok(())
    }

    fn current(&self, entity: Entity<K>) -> ChangeResult<P> {
        self.target.get(entity).cloned().ok_or_else(|| {
            ModelError::EntityNotFound {
                structure: self.target.descriptor().qualified_name(),
                entity: entity.id().to_string(),
            }
            .into()
        })
    }
}

pub struct TrackedRelation<'a, P, C> {
    target: &'a mut Relation<P, C>,
    log: Option<&'a mut RelationChanges<P, C>>,
}

impl<'a, P: EntityKind, C: EntityKind> TrackedRelation<'a, P, C> {
    pub fn new(target: &'a mut Relation<P, C>, log: Option<&'a mut RelationChanges<P, C>>) -> Self {
        Self { target, log }
    }

    #[must_use]
    pub fn is_tracking(&self) -> bool {
        self.log.is_some()
    }

    #[must_use]
    pub fn relation(&self) -> &Relation<P, C> {
        &*self.target
    }

    /// Links a pair.
    ///
    /// # Errors
    ///
    /// Fails on a duplicated pair or a cardinality violation, or when the
    /// log rejects the sequence. The relation is untouched on error.
    pub fn link(&mut self, parent: Entity<P>, child: Entity<C>) -> ChangeResult<()> {
        // Link first: it validates cardinality, and unlink restores it exactly.
        self.target.link(parent, child)?;
        if let Some(log) = self.log.as_deref_mut() {
            if let Err(err) = log.record_link(parent, child) {
                self.target.unlink(parent, child)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unlinks a pair.
    ///
    /// # Errors
    ///
    /// Fails if the pair is not linked, or when the log rejects the sequence.
    pub fn unlink(&mut self, parent: Entity<P>, child: Entity<C>) -> ChangeResult<()> {
        self.target.unlink(parent, child)?;
        if let Some(log) = self.log.as_deref_mut() {
            if let Err(err) = log.record_unlink(parent, child) {
                self.target.link(parent, child)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Unlinks every child of a parent.
    ///
    /// # Errors
    ///
    /// Fails when the log rejects the sequence.
    pub fn unlink_parent(&mut self, parent: Entity<P>) -> ChangeResult<usize> {
        let children: Vec<_> = self.target.children(parent).collect();
        for child in &children {
            self.unlink(parent, *child)?;
        }
        Ok(children.len())
    }

    /// Unlinks every parent of a child.
    ///
    /// # Errors
    ///
    /// Fails when the log rejects the sequence.
    pub fn unlink_child(&mut self, child: Entity<C>) -> ChangeResult<usize> {
        let parents: Vec<_> = self.target.parents(child).collect();
        for parent in &parents {
            self.unlink(*parent, child)?;
        }
        Ok(parents.len())
    }
}
