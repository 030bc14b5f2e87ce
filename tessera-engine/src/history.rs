//! Undo and redo stacks.
//!
//! The undo stack holds exactly the published changes that have not been
//! saved yet. A save pins the prefix it captured: undo may not reach into
//! a pinned entry, and a successful save removes exactly that prefix. New
//! entries pushed while the save runs stay above the pin.

use crate::error::{EngineError, EngineResult};
use crate::publication::Publication;
use std::sync::Arc;
use tessera_changes::ModelChanges;
use tessera_types::ChangeId;

/// One undoable step.
#[derive(Debug, Clone)]
pub(crate) struct HistoryEntry {
    pub id: ChangeId,
    pub version: u64,
    pub changes: Arc<ModelChanges>,
}

impl From<&Publication> for HistoryEntry {
    fn from(publication: &Publication) -> Self {
        Self {
            id: publication.change_id,
            version: publication.current.version(),
            changes: Arc::clone(&publication.changes),
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct History {
    undo: Vec<HistoryEntry>,
    redo: Vec<HistoryEntry>,
    pinned: Option<usize>,
}

impl History {
    /// Pushes the entry of a new command. Clears redo.
    pub fn record(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
        self.redo.clear();
    }

    /// Takes the most recent entry off the undo stack.
    pub fn pop_undo(&mut self) -> EngineResult<Option<HistoryEntry>> {
        if self.pinned.is_some_and(|pinned| pinned >= self.undo.len()) && !self.undo.is_empty() {
            return Err(EngineError::SaveInProgress);
        }
        Ok(self.undo.pop())
    }

    /// Puts back an entry whose undo failed.
    pub fn restore_undo(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
    }

    pub fn push_redo(&mut self, entry: HistoryEntry) {
        self.redo.push(entry);
    }

    pub fn pop_redo(&mut self) -> Option<HistoryEntry> {
        self.redo.pop()
    }

    /// Pushes a redone entry. Keeps the rest of the redo stack.
    pub fn push_redone(&mut self, entry: HistoryEntry) {
        self.undo.push(entry);
    }

    /// Drops both stacks, after a load.
    pub fn clear(&mut self) -> EngineResult<()> {
        if self.pinned.is_some() {
            return Err(EngineError::SaveInProgress);
        }
        self.undo.clear();
        self.redo.clear();
        Ok(())
    }

    /// Pins and returns the current undo stack for a save.
    pub fn begin_save(&mut self) -> EngineResult<Vec<HistoryEntry>> {
        if self.pinned.is_some() {
            return Err(EngineError::SaveInProgress);
        }
        self.pinned = Some(self.undo.len());
        Ok(self.undo.clone())
    }

    /// Removes the pinned prefix after a successful save.
    pub fn finish_save(&mut self) {
        if let Some(pinned) = self.pinned.take() {
            self.undo.drain(..pinned.min(self.undo.len()));
        }
    }

    /// Releases the pin without removing anything.
    pub fn abort_save(&mut self) {
        self.pinned = None;
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn is_saving(&self) -> bool {
        self.pinned.is_some()
    }
}
