//! Serializable forms of structure contents and changes.
//!
//! Rows are what a repository hands back on load. Change records are what
//! the engine writes on save and what history repositories store; they are
//! independent of the typed change sets so that a backend never needs to
//! know property types.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tessera_types::EntityId;

/// The action a change record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    Add,
    Remove,
    Modify,
    Link,
    Unlink,
}

impl ChangeAction {
    /// Whether the action applies to collections.
    #[must_use]
    pub const fn is_collection_action(&self) -> bool {
        matches!(self, Self::Add | Self::Remove | Self::Modify)
    }

    /// Whether the action applies to relations.
    #[must_use]
    pub const fn is_relation_action(&self) -> bool {
        matches!(self, Self::Link | Self::Unlink)
    }
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Add => "add",
            Self::Remove => "remove",
            Self::Modify => "modify",
            Self::Link => "link",
            Self::Unlink => "unlink",
        };
        f.write_str(name)
    }
}

/// One entry of a change log.
///
/// For collections `id` is the entity and `related` is absent. For relations
/// `id` is the parent and `related` the child.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub action: ChangeAction,
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub related: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_data: Option<Value>,
}

impl ChangeRecord {
    #[must_use]
    pub fn add(id: EntityId, new_data: Value) -> Self {
        Self {
            action: ChangeAction::Add,
            id,
            related: None,
            old_data: None,
            new_data: Some(new_data),
        }
    }

    #[must_use]
    pub fn remove(id: EntityId, old_data: Value) -> Self {
        Self {
            action: ChangeAction::Remove,
            id,
            related: None,
            old_data: Some(old_data),
            new_data: None,
        }
    }

    #[must_use]
    pub fn modify(id: EntityId, old_data: Value, new_data: Value) -> Self {
        Self {
            action: ChangeAction::Modify,
            id,
            related: None,
            old_data: Some(old_data),
            new_data: Some(new_data),
        }
    }

    #[must_use]
    pub fn link(parent: EntityId, child: EntityId) -> Self {
        Self {
            action: ChangeAction::Link,
            id: parent,
            related: Some(child),
            old_data: None,
            new_data: None,
        }
    }

    #[must_use]
    pub fn unlink(parent: EntityId, child: EntityId) -> Self {
        Self {
            action: ChangeAction::Unlink,
            id: parent,
            related: Some(child),
            old_data: None,
            new_data: None,
        }
    }
}

/// All change records of one structure, addressed by shard and structure name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructureRecords {
    pub shard: String,
    pub structure: String,
    pub entries: Vec<ChangeRecord>,
}

impl StructureRecords {
    #[must_use]
    pub fn new(shard: impl Into<String>, structure: impl Into<String>) -> Self {
        Self {
            shard: shard.into(),
            structure: structure.into(),
            entries: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A persisted collection row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionRow {
    pub id: EntityId,
    pub data: Value,
}

/// A persisted relation pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RelationRow {
    pub parent: EntityId,
    pub child: EntityId,
}

/// The full persisted contents of one structure.
#[derive(Debug, Clone, PartialEq)]
pub enum StructureRows {
    Collection(Vec<CollectionRow>),
    Relation(Vec<RelationRow>),
}

impl StructureRows {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            Self::Collection(rows) => rows.len(),
            Self::Relation(rows) => rows.len(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
