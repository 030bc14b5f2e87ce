//! The engine facade.

use crate::cancel::CancellationToken;
use crate::command::Command;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::history::History;
use crate::publication::CommandReceipt;
use crate::scheduler::{Job, Notification, Worker, run_dispatcher};
use crate::subscriptions::Subscriptions;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::task::{Context, Poll};
use tessera_model::Model;
use tessera_storage::{HistoryRecord, HistoryRepository, Migrator, Repository};
use tessera_types::ChangeId;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// In-process transactional engine over one [`Model`].
///
/// Reads are lock-free snapshots of the published model and may happen on
/// any thread. Writes are [`Command`]s, run one at a time on the mutation
/// lane. Cheap to clone; every clone drives the same engine.
///
/// # Example
///
/// ```no_run
/// use tessera_engine::{Engine, EngineConfig};
/// use tessera_model::Model;
///
/// # async fn run() -> tessera_engine::EngineResult<()> {
/// let engine = Engine::start(Model::builder().build()?, EngineConfig::default())?;
/// let model = engine.model();
/// assert_eq!(model.version(), 0);
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Engine {
    inner: Arc<Inner>,
}

struct Inner {
    config: EngineConfig,
    published: Arc<RwLock<Arc<Model>>>,
    history: Arc<Mutex<History>>,
    subscriptions: Subscriptions,
    jobs: Mutex<Option<mpsc::Sender<Job>>>,
    notify: mpsc::UnboundedSender<Notification>,
    running: Arc<AtomicBool>,
    worker: Mutex<Option<JoinHandle<()>>>,
    saving: tokio::sync::Mutex<()>,
}

impl Engine {
    /// Publishes `model` and starts the mutation and notification lanes.
    ///
    /// # Errors
    ///
    /// Returns `NoRuntime` outside a tokio runtime.
    pub fn start(model: Model, config: EngineConfig) -> EngineResult<Self> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let (job_tx, job_rx) = mpsc::channel(config.command_queue_capacity.max(1));
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();

        let version = model.version();
        let published = Arc::new(RwLock::new(Arc::new(model)));
        let history = Arc::new(Mutex::new(History::default()));
        let subscriptions = Subscriptions::new();
        let running = Arc::new(AtomicBool::new(true));

        let worker = Worker {
            name: config.name.clone(),
            blocking_bodies: config.blocking_bodies,
            published: Arc::clone(&published),
            history: Arc::clone(&history),
            notify: notify_tx.clone(),
            last_change_id: ChangeId::ZERO,
        };
        let worker = runtime.spawn(worker.run(job_rx, Arc::clone(&running)));
        runtime.spawn(run_dispatcher(notify_rx, subscriptions.clone()));

        info!("Engine {} started at version {}", config.name, version);
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                published,
                history,
                subscriptions,
                jobs: Mutex::new(Some(job_tx)),
                notify: notify_tx,
                running,
                worker: Mutex::new(Some(worker)),
                saving: tokio::sync::Mutex::new(()),
            }),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// The currently published model.
    #[must_use]
    pub fn model(&self) -> Arc<Model> {
        Arc::clone(&self.inner.published.read())
    }

    #[must_use]
    pub fn subscriptions(&self) -> &Subscriptions {
        &self.inner.subscriptions
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst) && self.inner.jobs.lock().is_some()
    }

    /// Number of published changes that can be undone, which is also the
    /// number of changes the next save will write.
    #[must_use]
    pub fn undo_depth(&self) -> usize {
        self.inner.history.lock().undo_len()
    }

    #[must_use]
    pub fn redo_depth(&self) -> usize {
        self.inner.history.lock().redo_len()
    }

    /// Whether a save currently pins part of the undo stack.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.inner.history.lock().is_saving()
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.undo_depth() > 0
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.redo_depth() > 0
    }

    /// Validates and queues a command, waiting for queue space.
    ///
    /// The returned handle resolves once the command has been published or
    /// discarded.
    ///
    /// # Errors
    ///
    /// Returns the command's validation error, or `Closed` after shutdown.
    pub async fn submit<C: Command>(&self, command: C) -> EngineResult<CommandHandle> {
        command.validate()?;
        let sender = self.sender()?;
        let (job, handle) = Self::command_job(Box::new(command));
        sender.send(job).await.map_err(|_| EngineError::Closed)?;
        Ok(handle)
    }

    /// Validates and queues a command without waiting.
    ///
    /// Commands queued from different threads run in the order their
    /// `try_submit` calls returned.
    ///
    /// # Errors
    ///
    /// Returns the command's validation error, `QueueFull`, or `Closed`.
    pub fn try_submit<C: Command>(&self, command: C) -> EngineResult<CommandHandle> {
        command.validate()?;
        let sender = self.sender()?;
        let (job, handle) = Self::command_job(Box::new(command));
        sender.try_send(job).map_err(|e| match e {
            TrySendError::Full(_) => EngineError::QueueFull,
            TrySendError::Closed(_) => EngineError::Closed,
        })?;
        Ok(handle)
    }

    /// Submits a command and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Any error of [`Engine::submit`] or of the command itself.
    pub async fn execute<C: Command>(&self, command: C) -> EngineResult<CommandReceipt> {
        self.submit(command).await?.await
    }

    /// Reverts the most recent undoable change.
    ///
    /// Returns `None` if there is nothing to undo.
    ///
    /// # Errors
    ///
    /// Returns `SaveInProgress` if the entry is being saved, or the
    /// conflict that stopped the inverse from applying.
    pub async fn undo(&self) -> EngineResult<Option<CommandReceipt>> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Undo { reply }, rx).await
    }

    /// Re-applies the most recently undone change.
    ///
    /// # Errors
    ///
    /// Returns the conflict that stopped the change from applying.
    pub async fn redo(&self) -> EngineResult<Option<CommandReceipt>> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Redo { reply }, rx).await
    }

    /// Runs a read-only closure against the published model on the
    /// blocking pool, in parallel with the mutation lane.
    ///
    /// # Errors
    ///
    /// Returns `Panicked` if the closure panics.
    pub async fn read<R, F>(&self, f: F) -> EngineResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Model) -> R + Send + 'static,
    {
        let model = self.model();
        tokio::task::spawn_blocking(move || f(&model))
            .await
            .map_err(|_| EngineError::Panicked("read".to_string()))
    }

    /// Writes every unsaved change to `repository`, then to `history` if
    /// given.
    ///
    /// The undo entries present when the save starts are pinned until it
    /// ends. Commands keep running meanwhile; their entries are not part of
    /// this save. On success exactly the pinned entries leave the undo
    /// stack. Returns the number of entries written.
    ///
    /// # Errors
    ///
    /// `Save` if the repository rejects the batch, in which case nothing is
    /// removed. `History` if the history repository fails after the
    /// repository accepted the batch; the entries are removed regardless.
    pub async fn save(
        &self,
        repository: &dyn Repository,
        history: Option<&dyn HistoryRepository>,
    ) -> EngineResult<usize> {
        let _saving = self.inner.saving.lock().await;
        let entries = self.inner.history.lock().begin_save()?;
        let mut pin = SavePin {
            history: &self.inner.history,
            armed: true,
        };

        let records = entries
            .iter()
            .map(|entry| -> EngineResult<HistoryRecord> {
                Ok(HistoryRecord::new(
                    entry.id,
                    entry.version,
                    entry.changes.to_records()?,
                ))
            })
            .collect::<EngineResult<Vec<_>>>()?;
        if records.is_empty() {
            return Ok(0);
        }

        repository.save(&records).await.map_err(|e| {
            warn!("Engine {} save failed: {}", self.inner.config.name, e);
            EngineError::Save(e)
        })?;
        self.inner.history.lock().finish_save();
        pin.armed = false;
        info!(
            "Engine {} saved {} changes up to {}",
            self.inner.config.name,
            records.len(),
            entries.last().map_or(ChangeId::ZERO, |e| e.id)
        );

        let count = records.len();
        if let Some(history) = history {
            for record in records {
                history.append(record).await.map_err(EngineError::History)?;
            }
        }
        Ok(count)
    }

    /// Replaces the contents of every structure with what `repository`
    /// holds, after running `migrator` if given.
    ///
    /// Loaded contents are published untracked and clear undo and redo.
    ///
    /// # Errors
    ///
    /// `Load` if migration or reading fails; the model is then unchanged.
    /// `SaveInProgress` if a save is running.
    pub async fn load(
        &self,
        repository: &dyn Repository,
        migrator: Option<&dyn Migrator>,
    ) -> EngineResult<CommandReceipt> {
        let descriptors: Vec<_> = self.model().descriptors().collect();
        if let Some(migrator) = migrator {
            migrator
                .migrate(&descriptors)
                .await
                .map_err(EngineError::Load)?;
        }

        let mut rows = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            let loaded = repository.load(&descriptor).await.map_err(EngineError::Load)?;
            debug!("Loaded {} rows of {}", loaded.len(), descriptor);
            rows.push((descriptor, loaded));
        }

        let (reply, rx) = oneshot::channel();
        self.dispatch(Job::Load { rows, reply }, rx).await
    }

    /// Applies history records newer than `after` and raises the engine's
    /// change ids above the latest one in `history`.
    ///
    /// Returns `None` if there was nothing to apply.
    ///
    /// # Errors
    ///
    /// `Storage` if the history cannot be read, or the first record that
    /// does not apply; the model is then unchanged.
    pub async fn catch_up(
        &self,
        history: &dyn HistoryRepository,
        after: Option<ChangeId>,
    ) -> EngineResult<Option<CommandReceipt>> {
        let records = history.load_since(after).await?;
        let floor = history.latest().await?;
        let (reply, rx) = oneshot::channel();
        self.dispatch(
            Job::Replay {
                records,
                floor,
                reply,
            },
            rx,
        )
        .await
    }

    /// Waits until every publication made so far has been delivered to
    /// subscribers.
    ///
    /// # Errors
    ///
    /// Returns `Closed` if the notification lane has stopped.
    pub async fn flush_notifications(&self) -> EngineResult<()> {
        let (reply, rx) = oneshot::channel();
        self.inner
            .notify
            .send(Notification::Barrier(reply))
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)
    }

    /// Stops accepting jobs, lets queued ones finish, and drains pending
    /// notifications.
    pub async fn shutdown(&self) {
        drop(self.inner.jobs.lock().take());
        let worker = self.inner.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!("Engine {} mutation lane ended abnormally: {}", self.inner.config.name, e);
            }
            let _ = self.flush_notifications().await;
            info!("Engine {} shut down", self.inner.config.name);
        }
    }

    fn sender(&self) -> EngineResult<mpsc::Sender<Job>> {
        self.inner.jobs.lock().clone().ok_or(EngineError::Closed)
    }

    fn command_job(command: Box<dyn Command>) -> (Job, CommandHandle) {
        let (reply, rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let job = Job::Command {
            command,
            cancel: cancel.clone(),
            reply,
        };
        (job, CommandHandle { reply: rx, cancel })
    }

    async fn dispatch<T>(&self, job: Job, rx: oneshot::Receiver<EngineResult<T>>) -> EngineResult<T> {
        self.sender()?
            .send(job)
            .await
            .map_err(|_| EngineError::Closed)?;
        rx.await.map_err(|_| EngineError::Closed)?
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("name", &self.inner.config.name)
            .field("version", &self.model().version())
            .finish()
    }
}

/// Releases the save pin if a save ends early, including when its future
/// is dropped.
struct SavePin<'a> {
    history: &'a Mutex<History>,
    armed: bool,
}

impl Drop for SavePin<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.history.lock().abort_save();
        }
    }
}

/// A queued command.
///
/// Await it for the outcome. Dropping the handle does not cancel the
/// command; call [`CommandHandle::cancel`] for that.
#[must_use = "await the handle to learn whether the command was published"]
#[derive(Debug)]
pub struct CommandHandle {
    reply: oneshot::Receiver<EngineResult<CommandReceipt>>,
    cancel: CancellationToken,
}

impl CommandHandle {
    /// Asks the command to stop. A command cancelled before it commits
    /// leaves the model unchanged and resolves to `Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

impl Future for CommandHandle {
    type Output = EngineResult<CommandReceipt>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().reply).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(EngineError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
