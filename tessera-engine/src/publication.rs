use std::fmt;
use std::sync::Arc;
use tessera_changes::ModelChanges;
use tessera_model::Model;
use tessera_types::ChangeId;

/// What produced a publication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Origin {
    Command,
    Undo,
    Redo,
    /// Contents read from a repository. Carries no change sets.
    Load,
    /// History records applied by catch-up. Carries no change sets.
    Replay,
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Command => "command",
            Self::Undo => "undo",
            Self::Redo => "redo",
            Self::Load => "load",
            Self::Replay => "replay",
        };
        f.write_str(name)
    }
}

/// One swap of the published model, as seen by subscribers.
#[derive(Debug, Clone)]
pub struct Publication {
    /// Strictly increasing per engine.
    pub change_id: ChangeId,
    pub origin: Origin,
    /// The model that was replaced.
    pub previous: Arc<Model>,
    /// The model now published.
    pub current: Arc<Model>,
    pub changes: Arc<ModelChanges>,
}

/// Outcome of a command, undo, redo, load or replay.
#[derive(Debug, Clone)]
pub struct CommandReceipt {
    /// `None` if nothing changed and nothing was published.
    pub change_id: Option<ChangeId>,
    /// Version of the published model after the job.
    pub version: u64,
    pub changes: Arc<ModelChanges>,
}

impl CommandReceipt {
    pub(crate) fn unchanged(version: u64, changes: ModelChanges) -> Self {
        Self {
            change_id: None,
            version,
            changes: Arc::new(changes),
        }
    }

    /// Whether the job published a new model.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.change_id.is_some()
    }
}

impl From<&Publication> for CommandReceipt {
    fn from(publication: &Publication) -> Self {
        Self {
            change_id: Some(publication.change_id),
            version: publication.current.version(),
            changes: Arc::clone(&publication.changes),
        }
    }
}
