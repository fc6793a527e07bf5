//! End-to-end sync behavior against the in-memory remote.

use std::time::Duration;

use habitkeep_core::auth::{AuthSession, AuthState, AuthUser};
use habitkeep_core::config::{SyncSettings, UnsyncedDeletePolicy};
use habitkeep_core::db::{HabitRepository, SqliteHabitRepository};
use habitkeep_core::models::{HabitUpdate, NewHabit, Table};
use habitkeep_core::services::{DatabaseService, HabitService};
use habitkeep_core::state::SyncState;
use habitkeep_core::sync::{Connectivity, MemoryRemote, SyncOrchestrator};
use habitkeep_core::{Habit, HabitId, SyncStatus};
use pretty_assertions::assert_eq;
use serde_json::json;

const USER: &str = "user-1";

fn signed_in() -> AuthState {
    AuthState::with_session(AuthSession {
        access_token: "access".to_string(),
        refresh_token: "refresh".to_string(),
        expires_at: i64::MAX / 2,
        user: AuthUser {
            id: USER.to_string(),
            email: None,
        },
    })
}

/// One client: its own local store, sharing a remote with other devices
struct Device {
    db: DatabaseService,
    habits: HabitService,
    sync: SyncOrchestrator<MemoryRemote>,
    connectivity: Connectivity,
}

impl Device {
    fn new(remote: &MemoryRemote) -> Self {
        Self::with_policy(remote, UnsyncedDeletePolicy::default())
    }

    fn with_policy(remote: &MemoryRemote, policy: UnsyncedDeletePolicy) -> Self {
        let db = DatabaseService::open_in_memory().unwrap();
        let auth = signed_in();
        let connectivity = Connectivity::new(true);
        let settings = SyncSettings {
            request_timeout_secs: 5,
            ..SyncSettings::default()
        };
        Self {
            habits: HabitService::new(db.clone(), auth.clone()).with_delete_policy(policy),
            sync: SyncOrchestrator::new(
                db.clone(),
                remote.clone(),
                auth,
                connectivity.clone(),
                &settings,
            ),
            db,
            connectivity,
        }
    }

    async fn habit_row(&self, id: &HabitId) -> Habit {
        let id = id.clone();
        self.db
            .read(move |conn| SqliteHabitRepository::new(conn).get_habit(&id))
            .await
            .unwrap()
            .unwrap()
    }

    async fn habit_named(&self, name: &str) -> Habit {
        self.habits
            .list_habits()
            .await
            .unwrap()
            .into_iter()
            .find(|habit| habit.name == name)
            .unwrap_or_else(|| panic!("no local habit named {name}"))
    }
}

fn live_rows(remote: &MemoryRemote, table: Table) -> Vec<serde_json::Value> {
    remote
        .rows(table)
        .into_iter()
        .filter(|row| row["deleted_at"].is_null())
        .collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn two_devices_converge() {
    let remote = MemoryRemote::new();
    let phone = Device::new(&remote);
    let laptop = Device::new(&remote);

    let habit = phone
        .habits
        .create_habit(NewHabit::named("Meditate"))
        .await
        .unwrap();
    phone.habits.complete_habit(&habit.id, None).await.unwrap();
    let report = phone.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 2);

    let report = laptop.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    let mirrored = laptop.habit_named("Meditate").await;
    assert_eq!(mirrored.server_id, phone.habit_row(&habit.id).await.server_id);
    assert_eq!(mirrored.sync_status, SyncStatus::Synced);
    assert!(laptop.habits.is_completed_today(&mirrored.id).await.unwrap());

    let rename = HabitUpdate {
        name: Some("Meditate daily".to_string()),
        ..HabitUpdate::default()
    };
    laptop.habits.update_habit(&mirrored.id, &rename).await.unwrap();
    assert!(laptop.sync.sync().await.success);

    let report = phone.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    let local = phone.habit_row(&habit.id).await;
    assert_eq!(local.name, "Meditate daily");
    assert_eq!(local.sync_status, SyncStatus::Synced);
    assert_eq!(phone.habits.list_habits().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn repeated_pulls_change_nothing() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    device
        .habits
        .create_habit(NewHabit::named("Stretch"))
        .await
        .unwrap();

    assert!(device.sync.sync().await.success);
    let before = device.habits.list_habits().await.unwrap();

    for _ in 0..2 {
        let report = device.sync.sync().await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.pushed, 0);
    }

    assert_eq!(device.habits.list_habits().await.unwrap(), before);
    assert_eq!(remote.rows(Table::Habits).len(), 1);
    assert_eq!(device.db.pending_count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn create_then_update_lands_updated_fields() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Read"))
        .await
        .unwrap();
    let update = HabitUpdate {
        name: Some("Read 20 pages".to_string()),
        color: Some("#10B981".to_string()),
        ..HabitUpdate::default()
    };
    device.habits.update_habit(&habit.id, &update).await.unwrap();
    assert_eq!(device.db.pending_count().await.unwrap(), 2);

    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 2);

    let rows = remote.rows(Table::Habits);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], "Read 20 pages");
    assert_eq!(rows[0]["color"], "#10B981");
    assert_eq!(rows[0]["user_id"], USER);
}

#[tokio::test(flavor = "multi_thread")]
async fn completions_reference_the_remote_habit() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Run"))
        .await
        .unwrap();
    device.habits.complete_habit(&habit.id, None).await.unwrap();

    assert!(device.sync.sync().await.success);

    let habit_row = &remote.rows(Table::Habits)[0];
    let completion_row = &remote.rows(Table::HabitCompletions)[0];
    assert_eq!(completion_row["habit_id"], habit_row["id"]);
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_unpushed_habit_cancels_its_queue() {
    let remote = MemoryRemote::new();
    let device = Device::with_policy(&remote, UnsyncedDeletePolicy::CancelPendingCreate);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Journal"))
        .await
        .unwrap();
    device.habits.complete_habit(&habit.id, None).await.unwrap();
    device.habits.delete_habit(&habit.id).await.unwrap();
    assert_eq!(device.db.pending_count().await.unwrap(), 0);

    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 0);
    assert!(remote.rows(Table::Habits).is_empty());
    assert!(remote.rows(Table::HabitCompletions).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_unpushed_habit_can_enqueue_the_delete() {
    let remote = MemoryRemote::new();
    let device = Device::with_policy(&remote, UnsyncedDeletePolicy::EnqueueDelete);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Journal"))
        .await
        .unwrap();
    device.habits.delete_habit(&habit.id).await.unwrap();
    assert_eq!(device.db.pending_count().await.unwrap(), 2);

    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 2);

    let rows = remote.rows(Table::Habits);
    assert_eq!(rows.len(), 1);
    assert!(rows[0]["deleted_at"].is_string());
    assert!(live_rows(&remote, Table::Habits).is_empty());
    assert!(device.habits.list_habits().await.unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn deleting_pushed_habit_soft_deletes_remotely() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Floss"))
        .await
        .unwrap();
    assert!(device.sync.sync().await.success);

    device.habits.delete_habit(&habit.id).await.unwrap();
    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 1);
    assert!(live_rows(&remote, Table::Habits).is_empty());
    assert_eq!(device.habit_row(&habit.id).await.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_push_stays_queued_and_retries() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Water"))
        .await
        .unwrap();

    remote.fail_writes(true);
    let report = device.sync.sync().await;
    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert!(report.errors[0].contains("attempt 1"), "{}", report.errors[0]);
    assert_eq!(device.sync.state(), SyncState::Error);

    let queue = device.db.list_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].retry_count, 1);
    assert!(queue[0].last_error.is_some());
    assert_eq!(device.habit_row(&habit.id).await.sync_status, SyncStatus::Error);

    remote.fail_writes(false);
    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 1);
    assert_eq!(device.db.pending_count().await.unwrap(), 0);
    assert_eq!(device.habit_row(&habit.id).await.sync_status, SyncStatus::Synced);
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_pull_row_is_fetched_again() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    remote
        .seed(
            Table::HabitCompletions,
            json!({
                "id": "completion-1",
                "habit_id": "ghost-habit",
                "user_id": USER,
                "completed_at": "2024-05-01T07:30:00Z"
            }),
        )
        .unwrap();

    let report = device.sync.sync().await;
    assert!(!report.success);
    assert_eq!(report.errors.len(), 1);
    assert_eq!(report.pulled, 0);

    remote
        .seed(
            Table::Habits,
            json!({
                "id": "ghost-habit",
                "user_id": USER,
                "name": "Yoga",
                "description": null,
                "color": "#F59E0B",
                "icon": "sun",
                "target_frequency": 3
            }),
        )
        .unwrap();

    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pulled, 2);

    let habit = device.habit_named("Yoga").await;
    assert_eq!(habit.server_id.as_deref(), Some("ghost-habit"));
    let completions = device.habits.list_completions(&habit.id, None).await.unwrap();
    assert_eq!(completions.len(), 1);
    assert_eq!(completions[0].server_id.as_deref(), Some("completion-1"));
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_collection_does_not_block_the_other() {
    let remote = MemoryRemote::new();
    let writer = Device::new(&remote);
    let reader = Device::new(&remote);
    let habit = writer
        .habits
        .create_habit(NewHabit::named("Piano"))
        .await
        .unwrap();
    writer.habits.complete_habit(&habit.id, None).await.unwrap();
    assert!(writer.sync.sync().await.success);

    remote.fail_reads(Table::HabitCompletions, true);
    let report = reader.sync.sync().await;
    assert!(!report.success);
    assert_eq!(report.pulled, 1);
    let mirrored = reader.habit_named("Piano").await;
    assert!(!reader.habits.is_completed_today(&mirrored.id).await.unwrap());

    remote.fail_reads(Table::HabitCompletions, false);
    let report = reader.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert!(reader.habits.is_completed_today(&mirrored.id).await.unwrap());
}

#[tokio::test(flavor = "multi_thread")]
async fn offline_sync_leaves_queue_alone() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    device
        .habits
        .create_habit(NewHabit::named("Walk"))
        .await
        .unwrap();

    device.connectivity.set_online(false);
    let report = device.sync.sync().await;
    assert!(!report.success);
    assert_eq!(remote.calls(), 0);

    let queue = device.db.list_queue().await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].retry_count, 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn second_trigger_during_cycle_is_rejected() {
    let remote = MemoryRemote::new();
    remote.set_latency(Some(Duration::from_millis(300)));
    let device = Device::new(&remote);
    device
        .habits
        .create_habit(NewHabit::named("Sleep early"))
        .await
        .unwrap();

    let mut state = device.sync.subscribe_state();
    let running = device.sync.clone();
    let cycle = tokio::spawn(async move { running.sync().await });
    state
        .wait_for(|state| *state == SyncState::Syncing)
        .await
        .unwrap();

    let rejected = device.sync.sync().await;
    assert!(!rejected.success);
    assert_eq!(rejected.errors, vec!["Sync already in progress".to_string()]);
    assert_eq!(device.db.list_queue().await.unwrap()[0].retry_count, 0);

    let report = cycle.await.unwrap();
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(remote.rows(Table::Habits).len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_abandons_the_cycle() {
    let remote = MemoryRemote::new();
    remote.set_latency(Some(Duration::from_millis(500)));
    let device = Device::new(&remote);
    for name in ["One", "Two", "Three"] {
        device
            .habits
            .create_habit(NewHabit::named(name))
            .await
            .unwrap();
    }

    let mut state = device.sync.subscribe_state();
    let running = device.sync.clone();
    let cycle = tokio::spawn(async move { running.sync().await });
    state
        .wait_for(|state| *state == SyncState::Syncing)
        .await
        .unwrap();
    device.sync.shutdown();

    let report = tokio::time::timeout(Duration::from_secs(2), cycle)
        .await
        .unwrap()
        .unwrap();
    assert!(!report.success);
    assert_eq!(report.errors, vec!["Sync cancelled".to_string()]);

    let queue = device.db.list_queue().await.unwrap();
    assert_eq!(queue.len(), 3);
    assert!(queue.iter().all(|entry| entry.retry_count == 0));
    assert!(remote.rows(Table::Habits).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_delete_push_is_not_undone_by_pull() {
    let remote = MemoryRemote::new();
    let device = Device::new(&remote);
    let habit = device
        .habits
        .create_habit(NewHabit::named("Floss"))
        .await
        .unwrap();
    assert!(device.sync.sync().await.success);

    device.habits.delete_habit(&habit.id).await.unwrap();
    remote.fail_writes(true);
    let report = device.sync.sync().await;
    assert!(!report.success);
    assert!(device.habits.list_habits().await.unwrap().is_empty());
    assert_eq!(device.db.pending_count().await.unwrap(), 1);

    remote.fail_writes(false);
    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert!(live_rows(&remote, Table::Habits).is_empty());

    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert!(device.habits.list_habits().await.unwrap().is_empty());
    let local = device.habit_row(&habit.id).await;
    assert!(local.deleted_at.is_some());
    assert_eq!(local.sync_status, SyncStatus::Synced);
}

#[tokio::test(start_paused = true)]
async fn slow_remote_times_out_each_call() {
    let remote = MemoryRemote::new();
    remote.set_latency(Some(Duration::from_secs(10)));
    let device = Device::new(&remote);
    for name in ["Tea", "Water"] {
        device
            .habits
            .create_habit(NewHabit::named(name))
            .await
            .unwrap();
    }

    let report = tokio::time::timeout(Duration::from_secs(60), device.sync.sync())
        .await
        .unwrap();
    assert!(!report.success);
    assert_eq!(report.pushed, 0);
    // two pushes and two pulls, each abandoned at the deadline
    assert_eq!(remote.calls(), 4);
    assert_eq!(report.errors.len(), 4);

    let queue = device.db.list_queue().await.unwrap();
    assert_eq!(queue.len(), 2);
    for entry in &queue {
        assert_eq!(entry.retry_count, 1);
        let last_error = entry.last_error.as_deref().unwrap_or_default();
        assert!(last_error.contains("timed out"), "{last_error}");
    }
    assert!(remote.rows(Table::Habits).is_empty());

    remote.set_latency(None);
    let report = device.sync.sync().await;
    assert!(report.success, "{:?}", report.errors);
    assert_eq!(report.pushed, 2);
    assert_eq!(device.db.pending_count().await.unwrap(), 0);
}
