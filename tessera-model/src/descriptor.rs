//! Stable descriptors for collections and relations.
//!
//! A descriptor is the `(name, type)` key a repository stores a structure
//! under. Descriptors come from static shard declarations, so every field
//! is `'static`.

use serde::Serialize;
use std::fmt;

/// How many values a key of a relation may map to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// Each parent has at most one child and each child at most one parent.
    OneToOne,
    /// A parent may have many children; each child has at most one parent.
    OneToMany,
    /// No restriction on either side.
    ManyToMany,
}

impl Cardinality {
    /// Whether a parent may be linked to more than one child.
    #[must_use]
    pub const fn many_children(&self) -> bool {
        matches!(self, Self::OneToMany | Self::ManyToMany)
    }

    /// Whether a child may be linked to more than one parent.
    #[must_use]
    pub const fn many_parents(&self) -> bool {
        matches!(self, Self::ManyToMany)
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::OneToOne => "one-to-one",
            Self::OneToMany => "one-to-many",
            Self::ManyToMany => "many-to-many",
        };
        f.write_str(name)
    }
}

/// The kind of structure a descriptor names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructureKind {
    Collection,
    Relation { cardinality: Cardinality },
}

/// Identifies one collection or relation inside one shard.
///
/// For a collection, `key_type` is the entity kind and `value_type` the
/// property type. For a relation, they are the parent and child entity kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct StructureDescriptor {
    pub shard: &'static str,
    pub name: &'static str,
    pub kind: StructureKind,
    pub key_type: &'static str,
    pub value_type: &'static str,
}

impl StructureDescriptor {
    /// Describes a collection of `key_type` entities holding `value_type` properties.
    #[must_use]
    pub const fn collection(
        shard: &'static str,
        name: &'static str,
        key_type: &'static str,
        value_type: &'static str,
    ) -> Self {
        Self {
            shard,
            name,
            kind: StructureKind::Collection,
            key_type,
            value_type,
        }
    }

    /// Describes a relation from `parent` entities to `child` entities.
    #[must_use]
    pub const fn relation(
        shard: &'static str,
        name: &'static str,
        cardinality: Cardinality,
        parent: &'static str,
        child: &'static str,
    ) -> Self {
        Self {
            shard,
            name,
            kind: StructureKind::Relation { cardinality },
            key_type: parent,
            value_type: child,
        }
    }

    #[must_use]
    pub const fn is_collection(&self) -> bool {
        matches!(self.kind, StructureKind::Collection)
    }

    #[must_use]
    pub const fn is_relation(&self) -> bool {
        matches!(self.kind, StructureKind::Relation { .. })
    }

    /// Returns the cardinality if this describes a relation.
    #[must_use]
    pub const fn cardinality(&self) -> Option<Cardinality> {
        match self.kind {
            StructureKind::Relation { cardinality } => Some(cardinality),
            StructureKind::Collection => None,
        }
    }

    /// `shard.name`, the form used in logs and error messages.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.shard, self.name)
    }
}

impl fmt::Display for StructureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.shard, self.name)
    }
}
