//! Entity identity.
//!
//! An entity is nothing but its id: the same id keys the entity in every
//! collection and relation that mentions it. Ids are UUID v7, so ids minted
//! later sort later.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::str::FromStr;
use uuid::Uuid;

/// Untyped identity of an entity.
///
/// Collections key their rows by it and relations pair two of them. The
/// typed [`Entity`] wrapper is what user code normally handles; the engine
/// drops down to `EntityId` where kinds are erased, such as persisted rows
/// and change records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Mints a fresh id, ordered after every id minted before it.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// A fixed id, for seed data and fixtures that must be reproducible.
    #[must_use]
    pub const fn from_u128(value: u128) -> Self {
        Self(Uuid::from_u128(value))
    }

    #[must_use]
    pub const fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Reads an id back from its hyphenated text form, as written by
    /// `Display` and by persisted rows.
    ///
    /// # Errors
    ///
    /// Returns `InvalidUuid` if `text` is not a UUID.
    pub fn parse(text: &str) -> crate::Result<Self> {
        Ok(Self(Uuid::parse_str(text)?))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for EntityId {
    type Err = crate::Error;

    fn from_str(text: &str) -> crate::Result<Self> {
        Self::parse(text)
    }
}

/// Marker for an entity type.
///
/// Implemented by zero-sized tag types, usually emitted by a schema
/// generator next to the shard declaration:
///
/// ```
/// use tessera_types::EntityKind;
///
/// pub struct Book;
/// impl EntityKind for Book {
///     const NAME: &'static str = "book";
/// }
/// ```
pub trait EntityKind: Send + Sync + 'static {
    /// Stable name of the entity type, used in descriptors and logs.
    const NAME: &'static str;
}

/// An entity identity tagged with its entity type.
///
/// `Entity<K>` is what collections and relations are keyed by. It carries
/// no data; two entities are equal when their ids are equal.
pub struct Entity<K> {
    id: EntityId,
    _kind: PhantomData<fn() -> K>,
}

impl<K: EntityKind> Entity<K> {
    /// Creates a fresh entity with a new id.
    #[must_use]
    pub fn new() -> Self {
        Self::from_id(EntityId::new())
    }
}

impl<K> Entity<K> {
    /// Tags an existing id with this entity type.
    #[must_use]
    pub const fn from_id(id: EntityId) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    /// Returns the untyped id.
    #[must_use]
    pub const fn id(&self) -> EntityId {
        self.id
    }
}

impl<K: EntityKind> Default for Entity<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Clone for Entity<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Entity<K> {}

impl<K> PartialEq for Entity<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for Entity<K> {}

impl<K> PartialOrd for Entity<K> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<K> Ord for Entity<K> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id.cmp(&other.id)
    }
}

impl<K> Hash for Entity<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K: EntityKind> fmt::Debug for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", K::NAME, self.id)
    }
}

impl<K: EntityKind> fmt::Display for Entity<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", K::NAME, self.id)
    }
}

impl<K> From<Entity<K>> for EntityId {
    fn from(entity: Entity<K>) -> Self {
        entity.id
    }
}

impl<K> Serialize for Entity<K> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.id.serialize(serializer)
    }
}

impl<'de, K> Deserialize<'de> for Entity<K> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        EntityId::deserialize(deserializer).map(Self::from_id)
    }
}
