//! The mutation lane and the notification lane.
//!
//! Every mutation of the published model is a [`Job`] on one bounded
//! queue, drained by a single worker task. The worker swaps the model,
//! updates history, hands the publication to the notification lane and
//! only then replies, so a caller that sees its reply can already read the
//! new model. Subscribers run on the notification lane, in publication
//! order, and never hold up the next job.

use crate::cancel::CancellationToken;
use crate::command::Command;
use crate::error::{EngineError, EngineResult};
use crate::history::{History, HistoryEntry};
use crate::publication::{CommandReceipt, Origin, Publication};
use crate::snapshot::{Feature, Snapshot};
use crate::subscriptions::Subscriptions;
use parking_lot::{Mutex, RwLock};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_changes::ModelChanges;
use tessera_model::{Model, StructureDescriptor, StructureRows};
use tessera_storage::HistoryRecord;
use tessera_types::ChangeId;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

const TRACKED: &[Feature] = &[Feature::CopyOnWrite, Feature::Tracking];
const UNTRACKED: &[Feature] = &[Feature::CopyOnWrite];

/// Work for the mutation lane.
pub(crate) enum Job {
    Command {
        command: Box<dyn Command>,
        cancel: CancellationToken,
        reply: oneshot::Sender<EngineResult<CommandReceipt>>,
    },
    Undo {
        reply: oneshot::Sender<EngineResult<Option<CommandReceipt>>>,
    },
    Redo {
        reply: oneshot::Sender<EngineResult<Option<CommandReceipt>>>,
    },
    Load {
        rows: Vec<(StructureDescriptor, StructureRows)>,
        reply: oneshot::Sender<EngineResult<CommandReceipt>>,
    },
    Replay {
        records: Vec<HistoryRecord>,
        /// Latest id known to the history repository.
        floor: Option<ChangeId>,
        reply: oneshot::Sender<EngineResult<Option<CommandReceipt>>>,
    },
}

/// Work for the notification lane.
pub(crate) enum Notification {
    Publish(Arc<Publication>),
    /// Answered once every earlier publication has been delivered.
    Barrier(oneshot::Sender<()>),
}

/// The single writer of the published model.
pub(crate) struct Worker {
    pub name: String,
    pub blocking_bodies: bool,
    pub published: Arc<RwLock<Arc<Model>>>,
    pub history: Arc<Mutex<History>>,
    pub notify: mpsc::UnboundedSender<Notification>,
    pub last_change_id: ChangeId,
}

impl Worker {
    pub async fn run(mut self, mut jobs: mpsc::Receiver<Job>, running: Arc<AtomicBool>) {
        while let Some(job) = jobs.recv().await {
            self.handle(job).await;
        }
        running.store(false, Ordering::SeqCst);
        info!("Engine {} mutation lane stopped", self.name);
    }

    async fn handle(&mut self, job: Job) {
        // A caller that dropped its handle no longer wants the reply.
        match job {
            Job::Command {
                command,
                cancel,
                reply,
            } => {
                let _ = reply.send(self.run_command(command, cancel).await);
            }
            Job::Undo { reply } => {
                let _ = reply.send(self.undo());
            }
            Job::Redo { reply } => {
                let _ = reply.send(self.redo());
            }
            Job::Load { rows, reply } => {
                let _ = reply.send(self.load(&rows));
            }
            Job::Replay {
                records,
                floor,
                reply,
            } => {
                if let Some(floor) = floor {
                    self.last_change_id = self.last_change_id.max(floor);
                }
                let _ = reply.send(self.replay(&records));
            }
        }
    }

    fn current(&self) -> Arc<Model> {
        Arc::clone(&self.published.read())
    }

    async fn run_command(
        &mut self,
        command: Box<dyn Command>,
        cancel: CancellationToken,
    ) -> EngineResult<CommandReceipt> {
        let name = command.name();
        cancel.check()?;

        let base = self.current();
        let snapshot = Snapshot::new(Arc::clone(&base), TRACKED)?;
        debug!("Executing command {} on version {}", name, base.version());

        let snapshot = match self.execute_body(command, snapshot, cancel).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Command {} discarded: {}", name, e);
                return Err(e);
            }
        };

        let (model, changes) = snapshot.freeze()?;
        if !changes.has_changes() {
            debug!("Command {} made no changes", name);
            return Ok(CommandReceipt::unchanged(base.version(), changes));
        }

        let publication = self.commit(base, model, changes, Origin::Command);
        self.history.lock().record(HistoryEntry::from(publication.as_ref()));
        let receipt = CommandReceipt::from(publication.as_ref());
        debug!(
            "Command {} published {} (version {})",
            name,
            publication.change_id,
            receipt.version
        );
        self.announce(publication);
        Ok(receipt)
    }

    async fn execute_body(
        &self,
        mut command: Box<dyn Command>,
        mut snapshot: Snapshot,
        cancel: CancellationToken,
    ) -> EngineResult<Snapshot> {
        let name = command.name();
        let body = move || -> EngineResult<Snapshot> {
            command.execute(&mut snapshot, &cancel)?;
            // Cancelled while running, even if the body never looked.
            cancel.check()?;
            Ok(snapshot)
        };

        if self.blocking_bodies {
            match tokio::task::spawn_blocking(body).await {
                Ok(result) => result,
                Err(e) if e.is_panic() => Err(EngineError::Panicked(name.to_string())),
                Err(e) => Err(EngineError::aborted(e.to_string())),
            }
        } else {
            catch_unwind(AssertUnwindSafe(body))
                .unwrap_or_else(|_| Err(EngineError::Panicked(name.to_string())))
        }
    }

    fn undo(&mut self) -> EngineResult<Option<CommandReceipt>> {
        let Some(entry) = self.history.lock().pop_undo()? else {
            return Ok(None);
        };
        match self.apply(&entry.changes.invert(), Origin::Undo) {
            Ok(publication) => {
                info!("Undid {} as {}", entry.id, publication.change_id);
                self.history.lock().push_redo(entry);
                let receipt = CommandReceipt::from(publication.as_ref());
                self.announce(publication);
                Ok(Some(receipt))
            }
            Err(e) => {
                warn!("Undo of {} failed: {}", entry.id, e);
                self.history.lock().restore_undo(entry);
                Err(e)
            }
        }
    }

    fn redo(&mut self) -> EngineResult<Option<CommandReceipt>> {
        let Some(entry) = self.history.lock().pop_redo() else {
            return Ok(None);
        };
        match self.apply(&entry.changes, Origin::Redo) {
            Ok(publication) => {
                self.history
                    .lock()
                    .push_redone(HistoryEntry::from(publication.as_ref()));
                let receipt = CommandReceipt::from(publication.as_ref());
                info!("Redid {} as {}", entry.id, publication.change_id);
                self.announce(publication);
                Ok(Some(receipt))
            }
            Err(e) => {
                warn!("Redo of {} failed: {}", entry.id, e);
                self.history.lock().push_redo(entry);
                Err(e)
            }
        }
    }

    /// Applies recorded changes through a tracking snapshot and publishes
    /// what the snapshot logged.
    fn apply(&mut self, changes: &ModelChanges, origin: Origin) -> EngineResult<Arc<Publication>> {
        let base = self.current();
        let mut snapshot = Snapshot::new(Arc::clone(&base), TRACKED)?;
        snapshot.apply_changes(changes)?;
        let (model, logged) = snapshot.freeze()?;
        Ok(self.commit(base, model, logged, origin))
    }

    fn load(&mut self, rows: &[(StructureDescriptor, StructureRows)]) -> EngineResult<CommandReceipt> {
        let base = self.current();
        let mut snapshot = Snapshot::new(Arc::clone(&base), UNTRACKED)?;
        for (descriptor, rows) in rows {
            snapshot.load_rows(descriptor, rows)?;
        }
        let (model, changes) = snapshot.freeze()?;
        // Loaded contents are not undoable, and older entries no longer
        // describe the model.
        self.history.lock().clear()?;

        let publication = self.commit(base, model, changes, Origin::Load);
        let receipt = CommandReceipt::from(publication.as_ref());
        info!(
            "Engine {} loaded {} structures as version {}",
            self.name,
            rows.len(),
            receipt.version
        );
        self.announce(publication);
        Ok(receipt)
    }

    fn replay(&mut self, records: &[HistoryRecord]) -> EngineResult<Option<CommandReceipt>> {
        let Some(last) = records.iter().map(|r| r.change_id).max() else {
            return Ok(None);
        };
        let base = self.current();
        let mut snapshot = Snapshot::new(Arc::clone(&base), UNTRACKED)?;
        for record in records {
            for structure in &record.structures {
                snapshot.apply_records(structure)?;
            }
        }
        let (model, changes) = snapshot.freeze()?;

        // Later ids must stay above everything already in the history.
        self.last_change_id = self.last_change_id.max(last);
        let publication = self.commit(base, model, changes, Origin::Replay);
        let receipt = CommandReceipt::from(publication.as_ref());
        info!(
            "Engine {} replayed {} history records up to {}",
            self.name,
            records.len(),
            last
        );
        self.announce(publication);
        Ok(Some(receipt))
    }

    /// Swaps the published model.
    fn commit(
        &mut self,
        previous: Arc<Model>,
        model: Model,
        changes: ModelChanges,
        origin: Origin,
    ) -> Arc<Publication> {
        self.last_change_id = self.last_change_id.next();
        let current = Arc::new(model);
        *self.published.write() = Arc::clone(&current);
        Arc::new(Publication {
            change_id: self.last_change_id,
            origin,
            previous,
            current,
            changes: Arc::new(changes),
        })
    }

    fn announce(&self, publication: Arc<Publication>) {
        if self.notify.send(Notification::Publish(publication)).is_err() {
            warn!("Engine {} notification lane closed", self.name);
        }
    }
}

/// Delivers publications to subscribers, one at a time, on the blocking
/// pool so that slow subscribers do not stall runtime threads.
pub(crate) async fn run_dispatcher(
    mut notifications: mpsc::UnboundedReceiver<Notification>,
    subscriptions: Subscriptions,
) {
    while let Some(notification) = notifications.recv().await {
        match notification {
            Notification::Publish(publication) => {
                let subscriptions = subscriptions.clone();
                let delivered =
                    tokio::task::spawn_blocking(move || subscriptions.dispatch(&publication)).await;
                if let Err(e) = delivered {
                    warn!("Notification delivery failed: {}", e);
                }
            }
            Notification::Barrier(reply) => {
                let _ = reply.send(());
            }
        }
    }
    debug!("Notification lane stopped");
}
