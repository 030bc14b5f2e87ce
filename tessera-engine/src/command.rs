//! Units of work for the mutation lane.

use crate::cancel::CancellationToken;
use crate::error::{EngineError, EngineResult};
use crate::snapshot::Snapshot;
use std::fmt;
use tessera_model::{CollectionDef, Entity, EntityKind, Properties, RelationDef, ShardDef};

/// A unit of work executed against a snapshot.
///
/// Commands run one at a time, in submission order. A command that returns
/// an error, panics, or is cancelled leaves the model untouched.
pub trait Command: Send + 'static {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Checks parameters before the command is queued.
    ///
    /// # Errors
    ///
    /// Typically `ParameterNotInitialized`.
    fn validate(&self) -> EngineResult<()> {
        Ok(())
    }

    /// Reads and writes the snapshot. Long bodies should poll `cancel`.
    ///
    /// # Errors
    ///
    /// Any error discards every write the body made.
    fn execute(&mut self, snapshot: &mut Snapshot, cancel: &CancellationToken) -> EngineResult<()>;
}

/// A command whose body is a closure. See [`command`].
pub struct FnCommand<F> {
    name: &'static str,
    body: F,
}

/// Wraps a closure as a command.
///
/// ```
/// use tessera_engine::{command, EngineResult};
///
/// let noop = command("noop", |_snapshot, _cancel| -> EngineResult<()> { Ok(()) });
/// ```
pub fn command<F>(name: &'static str, body: F) -> FnCommand<F>
where
    F: FnMut(&mut Snapshot, &CancellationToken) -> EngineResult<()> + Send + 'static,
{
    FnCommand { name, body }
}

impl<F> Command for FnCommand<F>
where
    F: FnMut(&mut Snapshot, &CancellationToken) -> EngineResult<()> + Send + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn execute(&mut self, snapshot: &mut Snapshot, cancel: &CancellationToken) -> EngineResult<()> {
        (self.body)(snapshot, cancel)
    }
}

impl<F> fmt::Debug for FnCommand<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnCommand").field("name", &self.name).finish()
    }
}

/// A named command parameter that must be set before submission.
#[derive(Debug, Clone)]
pub struct Param<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> Param<T> {
    /// An unset parameter.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    /// A parameter set to `value`.
    #[must_use]
    pub const fn with(name: &'static str, value: T) -> Self {
        Self {
            name,
            value: Some(value),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn set(&mut self, value: T) {
        self.value = Some(value);
    }

    #[must_use]
    pub fn is_set(&self) -> bool {
        self.value.is_some()
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    /// The value, or `ParameterNotInitialized` naming `command`.
    ///
    /// # Errors
    ///
    /// Returns `ParameterNotInitialized` if the parameter is unset.
    pub fn require(&self, command: &str) -> EngineResult<&T> {
        self.value
            .as_ref()
            .ok_or_else(|| EngineError::ParameterNotInitialized {
                command: command.to_string(),
                parameter: self.name,
            })
    }
}

/// Adds one entity with the given properties.
pub struct AddEntity<S, K, P> {
    def: CollectionDef<S, K, P>,
    entity: Param<Entity<K>>,
    properties: Param<P>,
}

impl<S: ShardDef, K: EntityKind, P: Properties> AddEntity<S, K, P> {
    #[must_use]
    pub fn new(def: CollectionDef<S, K, P>) -> Self {
        Self {
            def,
            entity: Param::new("entity"),
            properties: Param::new("properties"),
        }
    }

    /// Shorthand with both parameters set.
    #[must_use]
    pub fn of(def: CollectionDef<S, K, P>, entity: Entity<K>, properties: P) -> Self {
        Self::new(def).entity(entity).properties(properties)
    }

    #[must_use]
    pub fn entity(mut self, entity: Entity<K>) -> Self {
        self.entity.set(entity);
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: P) -> Self {
        self.properties.set(properties);
        self
    }
}

impl<S: ShardDef, K: EntityKind, P: Properties> Command for AddEntity<S, K, P> {
    fn name(&self) -> &'static str {
        "add_entity"
    }

    fn validate(&self) -> EngineResult<()> {
        self.entity.require(self.name())?;
        self.properties.require(self.name())?;
        Ok(())
    }

    fn execute(&mut self, snapshot: &mut Snapshot, _cancel: &CancellationToken) -> EngineResult<()> {
        let entity = *self.entity.require(self.name())?;
        let properties = self.properties.require(self.name())?.clone();
        snapshot
            .collection_mut(self.def)?
            .add_with_id(entity, properties)
    }
}

/// Replaces the properties of one entity.
pub struct UpdateEntity<S, K, P> {
    def: CollectionDef<S, K, P>,
    entity: Param<Entity<K>>,
    properties: Param<P>,
}

impl<S: ShardDef, K: EntityKind, P: Properties> UpdateEntity<S, K, P> {
    #[must_use]
    pub fn new(def: CollectionDef<S, K, P>) -> Self {
        Self {
            def,
            entity: Param::new("entity"),
            properties: Param::new("properties"),
        }
    }

    #[must_use]
    pub fn of(def: CollectionDef<S, K, P>, entity: Entity<K>, properties: P) -> Self {
        Self::new(def).entity(entity).properties(properties)
    }

    #[must_use]
    pub fn entity(mut self, entity: Entity<K>) -> Self {
        self.entity.set(entity);
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: P) -> Self {
        self.properties.set(properties);
        self
    }
}

impl<S: ShardDef, K: EntityKind, P: Properties> Command for UpdateEntity<S, K, P> {
    fn name(&self) -> &'static str {
        "update_entity"
    }

    fn validate(&self) -> EngineResult<()> {
        self.entity.require(self.name())?;
        self.properties.require(self.name())?;
        Ok(())
    }

    fn execute(&mut self, snapshot: &mut Snapshot, _cancel: &CancellationToken) -> EngineResult<()> {
        let entity = *self.entity.require(self.name())?;
        let properties = self.properties.require(self.name())?.clone();
        snapshot
            .collection_mut(self.def)?
            .replace(entity, properties)
            .map(drop)
    }
}

/// Removes one entity.
pub struct RemoveEntity<S, K, P> {
    def: CollectionDef<S, K, P>,
    entity: Param<Entity<K>>,
}

impl<S: ShardDef, K: EntityKind, P: Properties> RemoveEntity<S, K, P> {
    #[must_use]
    pub fn new(def: CollectionDef<S, K, P>) -> Self {
        Self {
            def,
            entity: Param::new("entity"),
        }
    }

    #[must_use]
    pub fn of(def: CollectionDef<S, K, P>, entity: Entity<K>) -> Self {
        Self::new(def).entity(entity)
    }

    #[must_use]
    pub fn entity(mut self, entity: Entity<K>) -> Self {
        self.entity.set(entity);
        self
    }
}

impl<S: ShardDef, K: EntityKind, P: Properties> Command for RemoveEntity<S, K, P> {
    fn name(&self) -> &'static str {
        "remove_entity"
    }

    fn validate(&self) -> EngineResult<()> {
        self.entity.require(self.name()).map(drop)
    }

    fn execute(&mut self, snapshot: &mut Snapshot, _cancel: &CancellationToken) -> EngineResult<()> {
        let entity = *self.entity.require(self.name())?;
        snapshot.collection_mut(self.def)?.remove(entity).map(drop)
    }
}

/// Links one parent to one child.
pub struct LinkEntities<S, P, C> {
    def: RelationDef<S, P, C>,
    parent: Param<Entity<P>>,
    child: Param<Entity<C>>,
}

/// Unlinks one parent from one child.
pub struct UnlinkEntities<S, P, C> {
    def: RelationDef<S, P, C>,
    parent: Param<Entity<P>>,
    child: Param<Entity<C>>,
}

macro_rules! pair_command {
    ($command:ident, $name:literal, $method:ident) => {
        impl<S: ShardDef, P: EntityKind, C: EntityKind> $command<S, P, C> {
            #[must_use]
            pub fn new(def: RelationDef<S, P, C>) -> Self {
                Self {
                    def,
                    parent: Param::new("parent"),
                    child: Param::new("child"),
                }
            }

            #[must_use]
            pub fn of(def: RelationDef<S, P, C>, parent: Entity<P>, child: Entity<C>) -> Self {
                Self::new(def).parent(parent).child(child)
            }

            #[must_use]
            pub fn parent(mut self, parent: Entity<P>) -> Self {
                self.parent.set(parent);
                self
            }

            #[must_use]
            pub fn child(mut self, child: Entity<C>) -> Self {
                self.child.set(child);
                self
            }
        }

        impl<S: ShardDef, P: EntityKind, C: EntityKind> Command for $command<S, P, C> {
            fn name(&self) -> &'static str {
                $name
            }

            fn validate(&self) -> EngineResult<()> {
                self.parent.require(self.name())?;
                self.child.require(self.name())?;
                Ok(())
            }

            fn execute(
                &mut self,
                snapshot: &mut Snapshot,
                _cancel: &CancellationToken,
            ) -> EngineResult<()> {
                let parent = *self.parent.require(self.name())?;
                let child = *self.child.require(self.name())?;
                snapshot.relation_mut(self.def)?.$method(parent, child)
            }
        }
    };
}

pair_command!(LinkEntities, "link_entities", link);
pair_command!(UnlinkEntities, "unlink_entities", unlink);
