//! End-to-end migration runs against the in-memory store and a scripted backend

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use shardctl::backend::Partition;
use shardctl::config::MigrationMode;
use shardctl::error::MigrateError;
use shardctl::migrate::{MigrationSettings, PreflightVerdict, SlotMigrationOrchestrator};
use shardctl::models::{MigrationTask, SlotStatus, TaskStatus, INVALID_ID};
use shardctl::store::{CoordinationStore, FileStore, MemoryStore};
use shardctl::testing::{add_group, cluster, master_addr, Call, ScriptedConnector, PRODUCT};

fn engine(store: &Arc<MemoryStore>, backend: &ScriptedConnector) -> SlotMigrationOrchestrator {
    engine_with(store, backend, MigrationSettings::default())
}

fn engine_with(
    store: &Arc<MemoryStore>,
    backend: &ScriptedConnector,
    settings: MigrationSettings,
) -> SlotMigrationOrchestrator {
    let store: Arc<dyn CoordinationStore> = store.clone();
    SlotMigrationOrchestrator::new(store, Arc::new(backend.clone()), settings)
        .with_holder("scenario")
}

#[tokio::test]
async fn test_three_slots_move_to_group_five() {
    let store = cluster(8, 1, &[5]).await;
    let backend = ScriptedConnector::constant(3).observing(store.clone());

    let mut task = MigrationTask::new(0, 2, 5, 0).unwrap();
    engine(&store, &backend).run(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.percent, 100);

    for slot in 0..=2 {
        assert_eq!(backend.calls_for_slot(slot), Partition::ALL);
        let meta = store.require_slot(slot).await.unwrap();
        assert_eq!(meta.status, SlotStatus::Online);
        assert_eq!(meta.group_id, 5);
        assert!(!meta.migrate_status.is_valid());
    }
    assert_eq!(backend.migrate_calls().len(), 15);

    // slots outside the range keep their owner
    assert_eq!(store.require_slot(3).await.unwrap().group_id, 1);

    // every batch moved while the slot was marked migrating
    let observed = backend.observed();
    assert_eq!(observed.len(), 15);
    assert!(observed.iter().all(|(_, s)| *s == SlotStatus::Migrating));

    // one connection per slot, always to the source master, ascending order
    let connects: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Connect(_)))
        .collect();
    assert_eq!(connects, vec![Call::Connect(master_addr(1)); 3]);
    let order: Vec<_> = backend.migrate_calls().into_iter().map(|(_, s)| s).collect();
    assert!(order.windows(2).all(|w| w[0] <= w[1]));

    // data goes to the destination master
    assert!(backend.calls().iter().all(|c| match c {
        Call::MigrateDb { dest, .. } => *dest == master_addr(5),
        _ => true,
    }));
    assert!(store.lock_holder().await.is_none());
}

#[tokio::test]
async fn test_missing_destination_mutates_nothing() {
    let store = cluster(4, 1, &[]).await;
    let before = store.snapshot().await;
    let backend = ScriptedConnector::constant(0);

    let mut task = MigrationTask::new(0, 3, 9, 0).unwrap();
    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();

    assert!(matches!(err.root(), MigrateError::GroupNotFound { group: 9 }));
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.percent, 0);
    assert_eq!(store.snapshot().await, before);
    assert!(backend.calls().is_empty());
    assert!(store.lock_holder().await.is_none());
}

#[tokio::test]
async fn test_range_past_last_slot_mutates_nothing() {
    let store = cluster(4, 1, &[5]).await;
    let before = store.snapshot().await;
    let backend = ScriptedConnector::constant(0);

    let mut task = MigrationTask::new(2, 6, 5, 0).unwrap();
    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();

    assert!(matches!(err.root(), MigrateError::SlotNotFound { slot: 4 }));
    assert_eq!(task.status, TaskStatus::Error);
    assert_eq!(task.percent, 0);
    assert_eq!(store.snapshot().await, before);
    assert!(backend.calls().is_empty());
    assert!(store.lock_holder().await.is_none());
}

#[tokio::test]
async fn test_stop_between_slots_leaves_next_slot_untouched() {
    let store = cluster(4, 1, &[5]).await;
    let mut task = MigrationTask::new(0, 2, 5, 0).unwrap();

    // stop while the last partition of slot 0 is in flight
    let relay = task.stop_token();
    let backend = ScriptedConnector::constant(0).on_call(move |call| {
        if let Call::MigrateDb {
            partition: Partition::Zset,
            slot: 0,
            ..
        } = call
        {
            relay.cancel();
        }
    });

    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();

    assert!(err.is_stopped());
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.percent, 33);

    let slot0 = store.require_slot(0).await.unwrap();
    assert_eq!(slot0.status, SlotStatus::Online);
    assert_eq!(slot0.group_id, 5);

    let slot1 = store.require_slot(1).await.unwrap();
    assert_eq!(slot1.status, SlotStatus::Online);
    assert_eq!(slot1.group_id, 1);
    assert!(!slot1.migrate_status.is_valid());
    assert!(backend.calls_for_slot(1).is_empty());
    assert!(store.lock_holder().await.is_none());
}

#[tokio::test]
async fn test_stop_mid_slot_then_resume() {
    let store = cluster(4, 1, &[5]).await;
    let mut task = MigrationTask::new(2, 2, 5, 0).unwrap();

    // never drains: only the stop ends the slot
    let relay = task.stop_token();
    let backend = ScriptedConnector::constant(10).on_call(move |call| {
        if matches!(call, Call::MigrateDb { .. }) {
            relay.cancel();
        }
    });

    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();
    assert!(err.is_stopped());
    assert_eq!(task.status, TaskStatus::Cancelled);
    assert_eq!(task.percent, 0);
    // the stop is seen before the very next step
    assert_eq!(backend.migrate_calls().len(), 1);

    let slot = store.require_slot(2).await.unwrap();
    assert_eq!(slot.status, SlotStatus::Migrating);
    assert_eq!(slot.migrate_status.from, 1);
    assert_eq!(slot.migrate_status.to, 5);

    // a new task for exactly that slot and group picks it up again
    let backend = ScriptedConnector::constant(0);
    let engine = engine(&store, &backend);
    let mut resume = MigrationTask::new(2, 2, 5, 0).unwrap();
    assert_eq!(
        engine.preflight(&resume).await.unwrap(),
        PreflightVerdict::Reattach { slot: 2 }
    );
    engine.run(&mut resume).await.unwrap();

    assert_eq!(resume.status, TaskStatus::Finished);
    let slot = store.require_slot(2).await.unwrap();
    assert_eq!(slot.status, SlotStatus::Online);
    assert_eq!(slot.group_id, 5);
    assert_eq!(backend.calls()[0], Call::Connect(master_addr(1)));
}

#[tokio::test]
async fn test_other_tasks_refused_while_slot_migrating() {
    let store = cluster(4, 1, &[5, 6]).await;
    let mut slot = store.require_slot(1).await.unwrap();
    store.set_migrate_status(&mut slot, 1, 5).await.unwrap();
    let backend = ScriptedConnector::constant(0);
    let engine = engine(&store, &backend);

    for task in [
        MigrationTask::new(0, 3, 5, 0).unwrap(),
        MigrationTask::new(1, 1, 6, 0).unwrap(),
        MigrationTask::new(2, 2, 5, 0).unwrap(),
    ] {
        assert!(matches!(
            engine.preflight(&task).await,
            Err(MigrateError::MigrationInProgress { slot: 1, to: 5 })
        ));
    }

    let mut other = store.require_slot(3).await.unwrap();
    store.set_migrate_status(&mut other, 1, 6).await.unwrap();
    let task = MigrationTask::new(1, 1, 5, 0).unwrap();
    assert!(matches!(
        engine.preflight(&task).await,
        Err(MigrateError::Inconsistent { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_master_wait_times_out() {
    let store = cluster(2, 1, &[]).await;
    add_group(&store, 5, false).await;
    let backend = ScriptedConnector::constant(0);

    let started = Instant::now();
    let mut task = MigrationTask::new(0, 1, 5, 0).unwrap();
    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();

    assert!(matches!(
        err.root(),
        MigrateError::GroupMasterNotFound { from: 1, to: 5 }
    ));
    assert!(started.elapsed() >= Duration::from_secs(100));
    assert_eq!(task.status, TaskStatus::Error);
    assert!(backend.calls().is_empty());
    // the intent was recorded before the wait and stays for a later resume
    assert_eq!(store.require_slot(0).await.unwrap().status, SlotStatus::Migrating);
    assert_eq!(store.require_slot(1).await.unwrap().group_id, 1);
}

#[tokio::test(start_paused = true)]
async fn test_delay_throttles_steps() {
    let store = cluster(1, 1, &[5]).await;
    let backend = ScriptedConnector::constant(0);

    let started = Instant::now();
    let mut task = MigrationTask::new(0, 0, 5, 250).unwrap();
    engine(&store, &backend).run(&mut task).await.unwrap();

    // five steps, a pause between each pair
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(1000));
    assert!(elapsed < Duration::from_millis(1100));
    assert_eq!(task.status, TaskStatus::Finished);
}

#[tokio::test]
async fn test_unreachable_source_aborts_task() {
    let store = Arc::new(MemoryStore::new(PRODUCT));
    let mut source = shardctl::models::ServerGroup::new(PRODUCT, 1);
    source.add_server("unreachable:6380", shardctl::models::ServerRole::Master);
    store.update_group(&source).await.unwrap();
    add_group(&store, 5, true).await;
    store.init_slots(3, false).await.unwrap();
    store.set_slot_range(0, 2, 1, SlotStatus::Online).await.unwrap();
    let backend = ScriptedConnector::constant(0);

    let mut task = MigrationTask::new(0, 2, 5, 0).unwrap();
    let err = engine(&store, &backend).run(&mut task).await.unwrap_err();

    assert!(matches!(err.root(), MigrateError::Timeout { .. }));
    assert!(err.is_recoverable());
    assert_eq!(task.status, TaskStatus::Error);
    // the failing slot aborts the task: later slots are never touched
    assert_eq!(store.require_slot(1).await.unwrap().status, SlotStatus::Online);
    assert_eq!(
        backend.calls(),
        vec![Call::Connect("unreachable:6380".to_string())]
    );
}

#[tokio::test]
async fn test_skipped_slots_keep_their_owner() {
    let store = cluster(6, 1, &[5]).await;
    store.set_slot_range(1, 1, 1, SlotStatus::Offline).await.unwrap();
    store
        .set_slot_range(2, 2, 5, SlotStatus::PendingMigrate)
        .await
        .unwrap();
    store.set_slot_range(3, 3, 5, SlotStatus::Online).await.unwrap();
    let backend = ScriptedConnector::constant(0);

    let mut task = MigrationTask::new(0, 4, 5, 0).unwrap();
    engine(&store, &backend).run(&mut task).await.unwrap();

    assert_eq!(task.status, TaskStatus::Finished);
    assert_eq!(task.percent, 100);
    let owners: Vec<_> = slot_owners(&store, 0..=4).await;
    assert_eq!(owners, vec![5, 1, 5, 5, 5]);
    assert_eq!(store.require_slot(1).await.unwrap().status, SlotStatus::Offline);
    assert_eq!(
        store.require_slot(2).await.unwrap().status,
        SlotStatus::PendingMigrate
    );
    let moved: Vec<_> = backend.migrate_calls().into_iter().map(|(_, s)| s).collect();
    assert!(moved.iter().all(|s| *s == 0 || *s == 4));
}

async fn slot_owners(
    store: &MemoryStore,
    range: std::ops::RangeInclusive<u32>,
) -> Vec<shardctl::models::GroupId> {
    let mut owners = Vec::new();
    for id in range {
        owners.push(store.require_slot(id).await.unwrap().group_id);
    }
    owners
}

#[tokio::test]
async fn test_keywise_mode() {
    let store = cluster(2, 1, &[5]).await;
    let backend = ScriptedConnector::constant(0);
    backend.push_scan(12, &["user:1", "user:2"]);
    backend.push_scan(0, &["user:3"]);
    let settings = MigrationSettings {
        mode: MigrationMode::Keywise,
        ..Default::default()
    };

    let mut task = MigrationTask::new(0, 0, 5, 0).unwrap();
    engine_with(&store, &backend, settings)
        .run(&mut task)
        .await
        .unwrap();

    assert_eq!(task.status, TaskStatus::Finished);
    assert!(backend.migrate_calls().is_empty());
    let keys: Vec<_> = backend
        .calls()
        .into_iter()
        .filter_map(|c| match c {
            Call::MigrateKey { key, slot } => Some((key, slot)),
            _ => None,
        })
        .collect();
    assert_eq!(keys.len(), 3);
    assert!(keys.iter().all(|(_, slot)| *slot == 0));
    // moved keys leave the source, so every pass rescans from the head
    let scans: Vec<_> = backend
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::Scan { .. }))
        .collect();
    assert_eq!(
        scans,
        vec![Call::Scan { cursor: 0, count: 10 }, Call::Scan { cursor: 0, count: 10 }]
    );
}

#[tokio::test]
async fn test_file_store_round_trip() {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(FileStore::open(dir.path(), PRODUCT).await.unwrap());
    let admin = shardctl::ClusterAdmin::new(store.clone(), PRODUCT, "ops");
    admin.add_server(1, &master_addr(1), None).await.unwrap();
    admin.add_server(5, &master_addr(5), None).await.unwrap();
    admin.init_slots(4, false).await.unwrap();
    admin
        .set_slot_range(0, 3, 1, SlotStatus::Online)
        .await
        .unwrap();

    let backend = ScriptedConnector::constant(0);
    let engine =
        SlotMigrationOrchestrator::new(store, Arc::new(backend), MigrationSettings::default());
    let mut task = MigrationTask::new(1, 2, 5, 0).unwrap();
    engine.run(&mut task).await.unwrap();

    let reopened = FileStore::open(dir.path(), PRODUCT).await.unwrap();
    for (id, owner) in [(0, 1), (1, 5), (2, 5), (3, 1)] {
        let slot = reopened.require_slot(id).await.unwrap();
        assert_eq!(slot.group_id, owner);
        assert_eq!(slot.status, SlotStatus::Online);
    }
    assert!(reopened.migrating_slots().await.unwrap().is_empty());
    assert!(!dir.path().join("cluster.lock").exists());

    // a freshly initialized slot carries no owner
    reopened.init_slots(2, true).await.unwrap();
    assert_eq!(reopened.require_slot(1).await.unwrap().group_id, INVALID_ID);
}

#[tokio::test]
async fn test_killed_run_recovered_with_force_unlock() {
    let dir = tempfile::TempDir::new().unwrap();
    let killed = FileStore::open(dir.path(), PRODUCT).await.unwrap();
    let admin = shardctl::ClusterAdmin::new(Arc::new(killed), PRODUCT, "ops");
    admin.add_server(1, &master_addr(1), None).await.unwrap();
    admin.add_server(5, &master_addr(5), None).await.unwrap();
    admin.init_slots(4, false).await.unwrap();
    admin
        .set_slot_range(0, 3, 1, SlotStatus::Online)
        .await
        .unwrap();
    drop(admin);

    // a run that died mid-slot: lock file and migrate status left behind
    let killed = FileStore::open(dir.path(), PRODUCT).await.unwrap();
    killed.lock("killed-run").await.unwrap();
    let mut slot = killed.require_slot(1).await.unwrap();
    killed.set_migrate_status(&mut slot, 1, 5).await.unwrap();
    drop(killed);

    let store = Arc::new(FileStore::open(dir.path(), PRODUCT).await.unwrap());
    let backend = ScriptedConnector::constant(0);
    let engine = SlotMigrationOrchestrator::new(
        store.clone(),
        Arc::new(backend.clone()),
        MigrationSettings::default(),
    );
    let mut task = MigrationTask::new(1, 1, 5, 0).unwrap();
    let err = engine.run(&mut task).await.unwrap_err();
    assert!(matches!(
        err.root(),
        MigrateError::ClusterLocked { holder } if holder == "killed-run"
    ));
    assert!(backend.calls().is_empty());

    let admin = shardctl::ClusterAdmin::new(store.clone(), PRODUCT, "ops");
    assert_eq!(
        admin.force_unlock().await.unwrap().as_deref(),
        Some("killed-run")
    );

    let mut task = MigrationTask::new(1, 1, 5, 0).unwrap();
    assert_eq!(
        engine.preflight(&task).await.unwrap(),
        PreflightVerdict::Reattach { slot: 1 }
    );
    engine.run(&mut task).await.unwrap();
    assert_eq!(task.status, TaskStatus::Finished);
    let slot = store.require_slot(1).await.unwrap();
    assert_eq!((slot.group_id, slot.status), (5, SlotStatus::Online));
    assert_eq!(store.require_slot(2).await.unwrap().group_id, 1);
    assert!(!dir.path().join("cluster.lock").exists());
}
