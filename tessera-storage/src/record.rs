use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tessera_model::StructureRecords;
use tessera_types::ChangeId;

/// The changes of one published command, as stored.
///
/// Records are independent of full-entity snapshots: replaying every record
/// in id order over the loaded data reproduces the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub change_id: ChangeId,
    /// Model version the change produced.
    pub version: u64,
    /// Unix milliseconds at which the record was built.
    pub recorded_at: i64,
    pub structures: Vec<StructureRecords>,
}

impl HistoryRecord {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(change_id: ChangeId, version: u64, structures: Vec<StructureRecords>) -> Self {
        Self {
            change_id,
            version,
            recorded_at: Utc::now().timestamp_millis(),
            structures,
        }
    }

    #[must_use]
    pub fn recorded_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.recorded_at).single()
    }

    /// Total number of change entries across structures.
    #[must_use]
    pub fn entry_count(&self) -> usize {
        self.structures.iter().map(|s| s.entries.len()).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.structures.iter().all(StructureRecords::is_empty)
    }
}
