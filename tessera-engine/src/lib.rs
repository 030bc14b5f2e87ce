//! Transactional engine for tessera models.
//!
//! # Architecture
//!
//! The engine publishes one immutable [`Model`](tessera_model::Model) at a
//! time. Readers take the published model and never block. Writers submit
//! [`Command`]s, which run one at a time against a [`Snapshot`]: a
//! copy-on-write view that clones a structure only when a command first
//! writes to it, and logs every write as a change.
//!
//! ## Components
//!
//! - **Snapshot**: copy-on-write, change-logging view over a model
//! - **Command**: unit of work with named parameters and cancellation
//! - **Scheduler**: the single writer and the notification lane
//! - **History**: undo and redo stacks of published changes
//! - **Subscriptions**: model, shard, collection, entity and relation callbacks
//! - **Engine**: the facade tying them to a repository and a history repository
//!
//! ## Publication
//!
//! 1. **Execute**: the command body writes to its snapshot
//! 2. **Freeze**: copied structures become the next model version
//! 3. **Publish**: the new model replaces the old one atomically
//! 4. **Record**: the changes go on the undo stack
//! 5. **Notify**: subscribers see the changes, in publication order
//!
//! # Example
//!
//! ```no_run
//! use tessera_engine::{Engine, EngineConfig, command};
//! use tessera_model::Model;
//!
//! # async fn run() -> tessera_engine::EngineResult<()> {
//! let engine = Engine::start(Model::builder().build()?, EngineConfig::named("library"))?;
//! let receipt = engine
//!     .execute(command("noop", |_snapshot, _cancel| Ok(())))
//!     .await?;
//! assert!(!receipt.is_published());
//! engine.shutdown().await;
//! # Ok(())
//! # }
//! ```

mod cancel;
mod command;
mod config;
mod engine;
mod error;
mod history;
pub mod logging;
mod publication;
mod scheduler;
mod snapshot;
mod subscriptions;

pub use cancel::CancellationToken;
pub use command::{
    AddEntity, Command, FnCommand, LinkEntities, Param, RemoveEntity, UnlinkEntities,
    UpdateEntity, command,
};
pub use config::EngineConfig;
pub use engine::{CommandHandle, Engine};
pub use error::{EngineError, EngineResult};
pub use publication::{CommandReceipt, Origin, Publication};
pub use snapshot::{CollectionMut, Feature, RelationMut, Slot, Snapshot};
pub use subscriptions::{CollectionEvent, RelationEvent, Subscription, Subscriptions};
