//! In-memory implementations of the storage contracts.
//!
//! Used by tests and as a reference for real backends. All three share an
//! optional [`CallLog`] so tests can assert the order of calls.

use crate::error::{StorageError, StorageResult};
use crate::record::HistoryRecord;
use crate::repository::{HistoryRepository, Migrator, Repository};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tessera_model::{
    ChangeAction, ChangeRecord, CollectionRow, RelationRow, StructureDescriptor, StructureRecords,
};
use tessera_types::{ChangeId, EntityId};
use tokio::sync::Mutex;

/// One call made against an in-memory store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Migrate { structures: usize },
    Save { records: usize },
    LoadCollection(String),
    LoadRelation(String),
    Append(ChangeId),
}

/// Shared, ordered log of calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
}

impl CallLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn push(&self, call: Call) {
        self.calls.lock().await.push(call);
    }

    pub async fn calls(&self) -> Vec<Call> {
        self.calls.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.calls.lock().await.clear();
    }
}

#[derive(Debug, Clone, Default)]
struct Tables {
    collections: HashMap<String, BTreeMap<EntityId, Value>>,
    relations: HashMap<String, BTreeSet<(EntityId, EntityId)>>,
}

impl Tables {
    fn apply(&mut self, records: &StructureRecords) -> StorageResult<()> {
        let key = format!("{}.{}", records.shard, records.structure);
        for entry in &records.entries {
            if entry.action.is_relation_action() {
                self.apply_pair(&key, entry)?;
            } else {
                self.apply_row(&key, entry)?;
            }
        }
        Ok(())
    }

    fn apply_row(&mut self, key: &str, entry: &ChangeRecord) -> StorageResult<()> {
        let rows = self.collections.entry(key.to_string()).or_default();
        let exists = rows.contains_key(&entry.id);
        match entry.action {
            ChangeAction::Add | ChangeAction::Modify => {
                let expected = entry.action == ChangeAction::Modify;
                if exists != expected {
                    return Err(StorageError::InvalidData(format!(
                        "{} of {} in {key}: row {}",
                        entry.action,
                        entry.id,
                        if exists { "exists" } else { "missing" }
                    )));
                }
                let data = entry.new_data.clone().ok_or_else(|| {
                    StorageError::InvalidData(format!("{} of {} without data", entry.action, entry.id))
                })?;
                rows.insert(entry.id, data);
            }
            ChangeAction::Remove => {
                if rows.remove(&entry.id).is_none() {
                    return Err(StorageError::NotFound(format!("{} in {key}", entry.id)));
                }
            }
            ChangeAction::Link | ChangeAction::Unlink => {
                return Err(StorageError::InvalidData(format!(
                    "{} entry for collection {key}",
                    entry.action
                )));
            }
        }
        Ok(())
    }

    fn apply_pair(&mut self, key: &str, entry: &ChangeRecord) -> StorageResult<()> {
        let child = entry
            .related
            .ok_or_else(|| StorageError::InvalidData(format!("{} without child in {key}", entry.action)))?;
        let pairs = self.relations.entry(key.to_string()).or_default();
        let changed = if entry.action == ChangeAction::Link {
            pairs.insert((entry.id, child))
        } else {
            pairs.remove(&(entry.id, child))
        };
        if !changed {
            return Err(StorageError::InvalidData(format!(
                "{} {} -> {child} in {key} does not change the stored pairs",
                entry.action, entry.id
            )));
        }
        Ok(())
    }
}

/// Repository keeping rows in memory, with failure injection.
#[derive(Debug, Default)]
pub struct MemoryRepository {
    tables: Mutex<Tables>,
    fail_saves: AtomicBool,
    fail_loads: AtomicBool,
    log: CallLog,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a repository that records its calls into `log`.
    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn log(&self) -> &CallLog {
        &self.log
    }

    /// Makes every following save fail until reset.
    pub fn fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Makes every following load fail until reset.
    pub fn fail_loads(&self, fail: bool) {
        self.fail_loads.store(fail, Ordering::SeqCst);
    }

    /// Stores a collection row directly, bypassing change records.
    pub async fn insert_row(&self, descriptor: &StructureDescriptor, row: CollectionRow) {
        self.tables
            .lock()
            .await
            .collections
            .entry(descriptor.qualified_name())
            .or_default()
            .insert(row.id, row.data);
    }

    /// Stores a relation pair directly, bypassing change records.
    pub async fn insert_pair(&self, descriptor: &StructureDescriptor, row: RelationRow) {
        self.tables
            .lock()
            .await
            .relations
            .entry(descriptor.qualified_name())
            .or_default()
            .insert((row.parent, row.child));
    }

    /// Current rows of a collection, ordered by id.
    pub async fn rows(&self, descriptor: &StructureDescriptor) -> Vec<CollectionRow> {
        let tables = self.tables.lock().await;
        tables
            .collections
            .get(&descriptor.qualified_name())
            .map(|rows| {
                rows.iter()
                    .map(|(id, data)| CollectionRow {
                        id: *id,
                        data: data.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Current pairs of a relation, ordered by parent then child.
    pub async fn pairs(&self, descriptor: &StructureDescriptor) -> Vec<RelationRow> {
        let tables = self.tables.lock().await;
        tables
            .relations
            .get(&descriptor.qualified_name())
            .map(|pairs| {
                pairs
                    .iter()
                    .map(|(parent, child)| RelationRow {
                        parent: *parent,
                        child: *child,
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl Repository for MemoryRepository {
    async fn save(&self, batch: &[HistoryRecord]) -> StorageResult<()> {
        self.log.push(Call::Save { records: batch.len() }).await;
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected save failure".to_string()));
        }

        let mut tables = self.tables.lock().await;
        let mut staged = tables.clone();
        for record in batch {
            for structure in &record.structures {
                staged.apply(structure)?;
            }
        }
        *tables = staged;
        Ok(())
    }

    async fn load_collection(&self, descriptor: &StructureDescriptor) -> StorageResult<Vec<CollectionRow>> {
        self.log
            .push(Call::LoadCollection(descriptor.qualified_name()))
            .await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected load failure".to_string()));
        }
        Ok(self.rows(descriptor).await)
    }

    async fn load_relation(&self, descriptor: &StructureDescriptor) -> StorageResult<Vec<RelationRow>> {
        self.log
            .push(Call::LoadRelation(descriptor.qualified_name()))
            .await;
        if self.fail_loads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("injected load failure".to_string()));
        }
        Ok(self.pairs(descriptor).await)
    }
}

/// History repository keeping records in memory.
#[derive(Debug, Default)]
pub struct MemoryHistoryRepository {
    records: Mutex<Vec<HistoryRecord>>,
    log: CallLog,
}

impl MemoryHistoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.lock().await.is_empty()
    }
}

#[async_trait]
impl HistoryRepository for MemoryHistoryRepository {
    async fn append(&self, record: HistoryRecord) -> StorageResult<()> {
        self.log.push(Call::Append(record.change_id)).await;
        let mut records = self.records.lock().await;
        if let Some(last) = records.last() {
            if record.change_id <= last.change_id {
                return Err(StorageError::OutOfOrder {
                    last: last.change_id,
                    got: record.change_id,
                });
            }
        }
        records.push(record);
        Ok(())
    }

    async fn load_since(&self, after: Option<ChangeId>) -> StorageResult<Vec<HistoryRecord>> {
        let records = self.records.lock().await;
        Ok(records
            .iter()
            .filter(|r| after.is_none_or(|after| r.change_id > after))
            .cloned()
            .collect())
    }

    async fn latest(&self) -> StorageResult<Option<ChangeId>> {
        Ok(self.records.lock().await.last().map(|r| r.change_id))
    }
}

/// Migrator that only records which structures it was asked to migrate.
#[derive(Debug, Default)]
pub struct RecordingMigrator {
    migrated: Mutex<Vec<StructureDescriptor>>,
    fail: AtomicBool,
    log: CallLog,
}

impl RecordingMigrator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Descriptors passed to the last successful migration.
    pub async fn migrated(&self) -> Vec<StructureDescriptor> {
        self.migrated.lock().await.clone()
    }
}

#[async_trait]
impl Migrator for RecordingMigrator {
    async fn migrate(&self, descriptors: &[StructureDescriptor]) -> StorageResult<()> {
        self.log
            .push(Call::Migrate {
                structures: descriptors.len(),
            })
            .await;
        if self.fail.load(Ordering::SeqCst) {
            return Err(StorageError::Migration("injected migration failure".to_string()));
        }
        *self.migrated.lock().await = descriptors.to_vec();
        Ok(())
    }
}
