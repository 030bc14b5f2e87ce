use crate::collection_changes::CollectionChanges;
use crate::error::ChangeResult;
use crate::frame::ChangesFrame;
use crate::relation_changes::RelationChanges;
use std::any::TypeId;
use tessera_model::{CollectionDef, EntityKind, Properties, RelationDef, ShardDef, StructureRecords};

/// Every change one command made, grouped by shard.
#[derive(Debug, Clone, Default)]
pub struct ModelChanges {
    frames: Vec<ChangesFrame>,
}

impl ModelChanges {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_frames(frames: Vec<ChangesFrame>) -> Self {
        Self { frames }
    }

    /// Frames in first-write order.
    #[must_use]
    pub fn frames(&self) -> &[ChangesFrame] {
        &self.frames
    }

    #[must_use]
    pub fn frame<S: ShardDef>(&self) -> Option<&ChangesFrame> {
        self.frame_by_type(TypeId::of::<S>())
    }

    #[must_use]
    pub fn frame_by_type(&self, type_id: TypeId) -> Option<&ChangesFrame> {
        self.frames.iter().find(|f| f.type_id() == type_id)
    }

    /// True if any frame holds a non-empty change set.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.frames.iter().any(ChangesFrame::has_changes)
    }

    /// Typed changes of a collection, if it was written.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored set has other types.
    pub fn collection<S: ShardDef, K: EntityKind, P: Properties>(
        &self,
        def: CollectionDef<S, K, P>,
    ) -> ChangeResult<Option<&CollectionChanges<K, P>>> {
        match self.frame::<S>() {
            Some(frame) => frame.collection(def),
            None => Ok(None),
        }
    }

    /// Typed changes of a relation, if it was written.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if the stored set has other types.
    pub fn relation<S: ShardDef, P: EntityKind, C: EntityKind>(
        &self,
        def: RelationDef<S, P, C>,
    ) -> ChangeResult<Option<&RelationChanges<P, C>>> {
        match self.frame::<S>() {
            Some(frame) => frame.relation(def),
            None => Ok(None),
        }
    }

    /// The changes that undo these ones.
    #[must_use]
    pub fn invert(&self) -> Self {
        Self {
            frames: self.frames.iter().map(ChangesFrame::invert).collect(),
        }
    }

    /// Net effect of `self` followed by `next`.
    ///
    /// # Errors
    ///
    /// Fails if any structure's change sets do not merge.
    pub fn merge(&self, next: &Self) -> ChangeResult<Self> {
        let mut merged = self.clone();
        for frame in &next.frames {
            match merged.frames.iter().position(|f| f.type_id() == frame.type_id()) {
                Some(i) => merged.frames[i] = merged.frames[i].merge(frame)?,
                None => merged.frames.push(frame.clone()),
            }
        }
        Ok(merged)
    }

    /// Records of every non-empty change set of every frame.
    ///
    /// # Errors
    ///
    /// Fails if properties cannot be serialized.
    pub fn to_records(&self) -> ChangeResult<Vec<StructureRecords>> {
        let mut records = Vec::new();
        for frame in &self.frames {
            records.extend(frame.to_records()?);
        }
        Ok(records)
    }

    /// Merges a sequence of changes in order.
    ///
    /// # Errors
    ///
    /// Fails on the first pair that does not merge.
    pub fn merge_all<'a>(changes: impl IntoIterator<Item = &'a ModelChanges>) -> ChangeResult<Self> {
        changes
            .into_iter()
            .try_fold(Self::new(), |acc, next| acc.merge(next))
    }
}

impl From<ChangesFrame> for ModelChanges {
    fn from(frame: ChangesFrame) -> Self {
        Self {
            frames: vec![frame],
        }
    }
}
