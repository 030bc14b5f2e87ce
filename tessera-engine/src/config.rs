//! Engine configuration.

use serde::{Deserialize, Serialize};

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name used in log lines, to tell engines apart.
    pub name: String,
    /// How many jobs may wait on the mutation lane before `try_submit`
    /// reports a full queue.
    pub command_queue_capacity: usize,
    /// Run command bodies on the blocking thread pool. When off, bodies
    /// run on the lane's own task.
    pub blocking_bodies: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "tessera".to_string(),
            command_queue_capacity: 64,
            blocking_bodies: true,
        }
    }
}

impl EngineConfig {
    /// A default configuration under another name.
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}
