use pretty_assertions::assert_eq;
use serde_json::json;
use tessera_model::{
    Cardinality, ChangeRecord, CollectionRow, RelationRow, StructureDescriptor, StructureRecords,
    StructureRows,
};
use tessera_storage::{
    Call, CallLog, HistoryRecord, HistoryRepository, MemoryHistoryRepository, MemoryRepository,
    Migrator, RecordingMigrator, Repository, StorageError,
};
use tessera_types::{ChangeId, EntityId};

const TASKS: StructureDescriptor = StructureDescriptor::collection("todo", "tasks", "task", "Task");
const BLOCKS: StructureDescriptor =
    StructureDescriptor::relation("todo", "blocks", Cardinality::ManyToMany, "task", "task");

fn record(id: u64, structures: Vec<StructureRecords>) -> HistoryRecord {
    HistoryRecord::new(ChangeId::new(id), id, structures)
}

fn task_records(entries: Vec<ChangeRecord>) -> StructureRecords {
    StructureRecords {
        shard: "todo".to_string(),
        structure: "tasks".to_string(),
        entries,
    }
}

fn block_records(entries: Vec<ChangeRecord>) -> StructureRecords {
    StructureRecords {
        shard: "todo".to_string(),
        structure: "blocks".to_string(),
        entries,
    }
}

// ── Repository ───────────────────────────────────────────────────

#[tokio::test]
async fn save_applies_batch_in_order() {
    let repo = MemoryRepository::new();
    let (a, b) = (EntityId::new(), EntityId::new());

    repo.save(&[
        record(
            1,
            vec![task_records(vec![
                ChangeRecord::add(a, json!({ "title": "a" })),
                ChangeRecord::add(b, json!({ "title": "b" })),
            ])],
        ),
        record(
            2,
            vec![
                task_records(vec![ChangeRecord::modify(
                    a,
                    json!({ "title": "a" }),
                    json!({ "title": "a2" }),
                )]),
                block_records(vec![ChangeRecord::link(a, b)]),
            ],
        ),
    ])
    .await
    .unwrap();

    let mut rows = repo.load_collection(&TASKS).await.unwrap();
    rows.sort_by_key(|r| r.id);
    let mut expected = vec![
        CollectionRow {
            id: a,
            data: json!({ "title": "a2" }),
        },
        CollectionRow {
            id: b,
            data: json!({ "title": "b" }),
        },
    ];
    expected.sort_by_key(|r| r.id);
    assert_eq!(rows, expected);
    assert_eq!(
        repo.load_relation(&BLOCKS).await.unwrap(),
        vec![RelationRow { parent: a, child: b }]
    );
}

#[tokio::test]
async fn failing_batch_changes_nothing() {
    let repo = MemoryRepository::new();
    let a = EntityId::new();

    let err = repo
        .save(&[
            record(1, vec![task_records(vec![ChangeRecord::add(a, json!(1))])]),
            record(2, vec![task_records(vec![ChangeRecord::remove(EntityId::new(), json!(0))])]),
        ])
        .await
        .unwrap_err();

    assert!(matches!(err, StorageError::NotFound(_)));
    assert!(repo.rows(&TASKS).await.is_empty());
}

#[tokio::test]
async fn injected_failures() {
    let repo = MemoryRepository::new();
    repo.fail_saves(true);
    assert!(matches!(
        repo.save(&[]).await.unwrap_err(),
        StorageError::Backend(_)
    ));

    repo.fail_loads(true);
    assert!(repo.load(&TASKS).await.is_err());

    repo.fail_saves(false);
    repo.fail_loads(false);
    repo.save(&[]).await.unwrap();
    assert_eq!(repo.load(&TASKS).await.unwrap(), StructureRows::Collection(Vec::new()));
}

#[tokio::test]
async fn load_dispatches_on_kind() {
    let repo = MemoryRepository::new();
    let (a, b) = (EntityId::new(), EntityId::new());
    repo.insert_pair(&BLOCKS, RelationRow { parent: a, child: b })
        .await;

    assert_eq!(
        repo.load(&BLOCKS).await.unwrap(),
        StructureRows::Relation(vec![RelationRow { parent: a, child: b }])
    );
}

#[tokio::test]
async fn add_of_existing_row_is_invalid() {
    let repo = MemoryRepository::new();
    let a = EntityId::new();
    repo.insert_row(&TASKS, CollectionRow { id: a, data: json!(1) })
        .await;

    let err = repo
        .save(&[record(1, vec![task_records(vec![ChangeRecord::add(a, json!(2))])])])
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidData(_)));
}

// ── History ──────────────────────────────────────────────────────

#[tokio::test]
async fn history_appends_in_order_and_loads_since() {
    let history = MemoryHistoryRepository::new();
    for id in 1..=3 {
        history.append(record(id, Vec::new())).await.unwrap();
    }

    assert_eq!(history.latest().await.unwrap(), Some(ChangeId::new(3)));
    assert_eq!(history.load_since(None).await.unwrap().len(), 3);

    let later: Vec<_> = history
        .load_since(Some(ChangeId::new(1)))
        .await
        .unwrap()
        .into_iter()
        .map(|r| r.change_id)
        .collect();
    assert_eq!(later, vec![ChangeId::new(2), ChangeId::new(3)]);
}

#[tokio::test]
async fn history_rejects_non_increasing_ids() {
    let history = MemoryHistoryRepository::new();
    history.append(record(2, Vec::new())).await.unwrap();

    let err = history.append(record(2, Vec::new())).await.unwrap_err();
    assert!(matches!(err, StorageError::OutOfOrder { .. }));
    assert!(history.append(record(1, Vec::new())).await.is_err());
    assert_eq!(history.len().await, 1);
}

#[test]
fn record_counts_entries() {
    let r = record(
        1,
        vec![
            task_records(vec![ChangeRecord::add(EntityId::new(), json!(1))]),
            block_records(Vec::new()),
        ],
    );
    assert_eq!(r.entry_count(), 1);
    assert!(!r.is_empty());
    assert!(r.recorded_at().is_some());
    assert!(record(2, vec![block_records(Vec::new())]).is_empty());
}

#[test]
fn record_serializes_to_json() {
    let r = record(7, Vec::new());
    let value = serde_json::to_value(&r).unwrap();
    assert_eq!(value["change_id"], json!(7));

    let back: HistoryRecord = serde_json::from_value(value).unwrap();
    assert_eq!(back, r);
}

// ── Migration ordering ───────────────────────────────────────────

#[tokio::test]
async fn shared_log_orders_calls() {
    let log = CallLog::new();
    let migrator = RecordingMigrator::with_log(log.clone());
    let repo = MemoryRepository::with_log(log.clone());

    migrator.migrate(&[TASKS, BLOCKS]).await.unwrap();
    repo.load(&TASKS).await.unwrap();
    repo.load(&BLOCKS).await.unwrap();

    assert_eq!(
        log.calls().await,
        vec![
            Call::Migrate { structures: 2 },
            Call::LoadCollection("todo.tasks".to_string()),
            Call::LoadRelation("todo.blocks".to_string()),
        ]
    );
    assert_eq!(migrator.migrated().await, vec![TASKS, BLOCKS]);
}

#[tokio::test]
async fn failing_migration_is_reported() {
    let migrator = RecordingMigrator::new();
    migrator.fail(true);
    let err = migrator.migrate(&[TASKS]).await.unwrap_err();
    assert!(matches!(err, StorageError::Migration(_)));
    assert!(migrator.migrated().await.is_empty());
}
