//! Sync cycle scheduling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::auth::AuthState;
use crate::config::SyncSettings;
use crate::error::Error;
use crate::services::DatabaseService;
use crate::state::SyncState;

use super::connectivity::Connectivity;
use super::reconcile::Reconciler;
use super::remote::RemoteStore;
use super::{wait_for_shutdown, SyncReport};

struct Inner<R> {
    db: DatabaseService,
    remote: R,
    auth: AuthState,
    connectivity: Connectivity,
    interval: Duration,
    timeout: Duration,
    syncing: AtomicBool,
    state: watch::Sender<SyncState>,
    last_report: Mutex<Option<SyncReport>>,
    shutdown: watch::Sender<bool>,
}

/// Runs push-then-pull cycles, one at a time
///
/// Cycles start on an explicit [`sync`](Self::sync) call, on every interval
/// tick while online, and whenever connectivity comes back. Clones share the
/// same orchestrator.
pub struct SyncOrchestrator<R: RemoteStore> {
    inner: Arc<Inner<R>>,
}

impl<R: RemoteStore> Clone for SyncOrchestrator<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Holds the single-flight flag for the length of a cycle
struct SyncGuard<'a>(&'a AtomicBool);

impl<'a> SyncGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<R: RemoteStore> SyncOrchestrator<R> {
    pub fn new(
        db: DatabaseService,
        remote: R,
        auth: AuthState,
        connectivity: Connectivity,
        settings: &SyncSettings,
    ) -> Self {
        let initial = if connectivity.is_online() {
            SyncState::Idle
        } else {
            SyncState::Offline
        };
        let (state, _) = watch::channel(initial);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                db,
                remote,
                auth,
                connectivity,
                interval: settings.sync_interval(),
                timeout: settings.request_timeout(),
                syncing: AtomicBool::new(false),
                state,
                last_report: Mutex::new(None),
                shutdown,
            }),
        }
    }

    /// Run one cycle now
    ///
    /// Never fails: an offline device, a missing user or a cycle already in
    /// flight come back as an unsuccessful report, and none of them touch the
    /// queue.
    pub async fn sync(&self) -> SyncReport {
        let inner = &self.inner;
        if !inner.connectivity.is_online() {
            self.set_state(SyncState::Offline);
            return SyncReport::failed(Error::Offline.to_string());
        }
        let Some(user_id) = inner.auth.current_user_id() else {
            return SyncReport::failed(Error::NotAuthenticated.to_string());
        };
        let Some(_guard) = SyncGuard::acquire(&inner.syncing) else {
            tracing::debug!("Sync requested while a cycle is running");
            return SyncReport::failed(Error::SyncAlreadyInProgress.to_string());
        };

        self.set_state(SyncState::Syncing);
        tracing::info!("Sync started");

        let reconciler = Reconciler::new(
            &inner.db,
            &inner.remote,
            &user_id,
            inner.timeout,
            inner.shutdown.subscribe(),
        );
        let mut report = SyncReport::default();
        reconciler.push_all(&mut report).await;
        if !reconciler.is_cancelled() {
            reconciler.pull_all(&mut report).await;
        }
        let report = report.finish();

        self.set_state(if report.success {
            SyncState::Synced
        } else {
            SyncState::Error
        });
        tracing::info!(
            "Sync finished: {} pushed, {} pulled, {} errors",
            report.pushed,
            report.pulled,
            report.errors.len()
        );

        *inner
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(report.clone());
        report
    }

    pub fn is_syncing(&self) -> bool {
        self.inner.syncing.load(Ordering::Acquire)
    }

    pub fn state(&self) -> SyncState {
        *self.inner.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SyncState> {
        self.inner.state.subscribe()
    }

    /// Report of the most recent cycle that actually ran
    pub fn last_report(&self) -> Option<SyncReport> {
        self.inner
            .last_report
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Receiver that flips to `true` on [`shutdown`](Self::shutdown)
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.inner.shutdown.subscribe()
    }

    /// Stop the background loop and abandon in-flight remote calls
    pub fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
    }

    pub fn spawn(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        tokio::spawn(async move { orchestrator.run().await })
    }

    /// Trigger loop; returns after [`shutdown`](Self::shutdown)
    pub async fn run(&self) {
        let mut shutdown = self.shutdown_signal();
        let mut online = self.inner.connectivity.subscribe();
        let mut was_online = *online.borrow_and_update();
        let mut ticker = tokio::time::interval(self.inner.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            "Sync loop started (interval {}s)",
            self.inner.interval.as_secs()
        );
        loop {
            tokio::select! {
                biased;
                () = wait_for_shutdown(&mut shutdown) => break,
                Ok(()) = online.changed() => {
                    let now_online = *online.borrow_and_update();
                    if now_online && !was_online {
                        self.run_cycle("connectivity restored").await;
                    } else if !now_online {
                        self.set_state(SyncState::Offline);
                    }
                    was_online = now_online;
                }
                _ = ticker.tick() => {
                    if self.inner.connectivity.is_online() {
                        self.run_cycle("interval").await;
                    }
                }
            }
        }
        tracing::info!("Sync loop stopped");
    }

    async fn run_cycle(&self, trigger: &str) {
        tracing::debug!("Sync triggered by {trigger}");
        let report = self.sync().await;
        if !report.success {
            tracing::error!(
                "Sync triggered by {trigger} failed: {}",
                report.errors.join("; ")
            );
        }
    }

    fn set_state(&self, state: SyncState) {
        self.inner.state.send_replace(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{AuthSession, AuthUser};
    use crate::models::{NewHabit, Table};
    use crate::services::HabitService;
    use crate::sync::MemoryRemote;
    use crate::util::unix_timestamp_now;

    fn signed_in() -> AuthState {
        AuthState::with_session(AuthSession {
            access_token: "access".to_string(),
            refresh_token: "refresh".to_string(),
            expires_at: unix_timestamp_now() + 3600,
            user: AuthUser {
                id: "user-1".to_string(),
                email: Some("user@example.com".to_string()),
            },
        })
    }

    fn settings() -> SyncSettings {
        SyncSettings {
            sync_interval_secs: 3600,
            request_timeout_secs: 2,
            ..SyncSettings::default()
        }
    }

    fn orchestrator(
        remote: &MemoryRemote,
        auth: AuthState,
        connectivity: Connectivity,
    ) -> (DatabaseService, SyncOrchestrator<MemoryRemote>) {
        let db = DatabaseService::open_in_memory().unwrap();
        let orchestrator =
            SyncOrchestrator::new(db.clone(), remote.clone(), auth, connectivity, &settings());
        (db, orchestrator)
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn offline_sync_is_rejected() {
        let remote = MemoryRemote::new();
        let (_, orchestrator) = orchestrator(&remote, signed_in(), Connectivity::new(false));

        let report = orchestrator.sync().await;
        assert!(!report.success);
        assert_eq!(report.errors, vec!["Offline; sync skipped".to_string()]);
        assert_eq!(orchestrator.state(), SyncState::Offline);
        assert_eq!(remote.calls(), 0);
        assert!(orchestrator.last_report().is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn signed_out_sync_is_rejected() {
        let remote = MemoryRemote::new();
        let (_, orchestrator) = orchestrator(&remote, AuthState::new(), Connectivity::default());

        let report = orchestrator.sync().await;
        assert!(!report.success);
        assert_eq!(report.errors, vec!["Not authenticated".to_string()]);
        assert_eq!(remote.calls(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn successful_cycle_publishes_state_and_report() {
        let remote = MemoryRemote::new();
        let auth = signed_in();
        let (db, orchestrator) = orchestrator(&remote, auth.clone(), Connectivity::default());
        HabitService::new(db.clone(), auth)
            .create_habit(NewHabit::named("Read"))
            .await
            .unwrap();

        let report = orchestrator.sync().await;
        assert!(report.success, "{:?}", report.errors);
        assert_eq!(report.pushed, 1);
        assert_eq!(orchestrator.state(), SyncState::Synced);
        assert_eq!(orchestrator.last_report(), Some(report));
        assert!(!orchestrator.is_syncing());
        assert_eq!(db.pending_count().await.unwrap(), 0);
        assert_eq!(remote.rows(Table::Habits).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_sync_is_single_flight() {
        let remote = MemoryRemote::new();
        remote.set_latency(Some(Duration::from_millis(200)));
        let (_, orchestrator) = orchestrator(&remote, signed_in(), Connectivity::default());

        let running = orchestrator.clone();
        let first = tokio::spawn(async move { running.sync().await });
        let mut state = orchestrator.subscribe_state();
        state
            .wait_for(|state| *state == SyncState::Syncing)
            .await
            .unwrap();

        let rejected = orchestrator.sync().await;
        assert!(!rejected.success);
        assert_eq!(rejected.errors, vec!["Sync already in progress".to_string()]);
        assert!(orchestrator.is_syncing());

        let finished = first.await.unwrap();
        assert!(finished.success, "{:?}", finished.errors);
        assert!(!orchestrator.is_syncing());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn loop_syncs_when_connectivity_returns() {
        let remote = MemoryRemote::new();
        let auth = signed_in();
        let connectivity = Connectivity::new(false);
        let (db, orchestrator) = orchestrator(&remote, auth.clone(), connectivity.clone());
        HabitService::new(db.clone(), auth)
            .create_habit(NewHabit::named("Walk"))
            .await
            .unwrap();

        let handle = orchestrator.spawn();
        let mut state = orchestrator.subscribe_state();
        connectivity.set_online(true);
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == SyncState::Synced),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(remote.rows(Table::Habits).len(), 1);

        connectivity.set_online(false);
        tokio::time::timeout(
            Duration::from_secs(5),
            state.wait_for(|state| *state == SyncState::Offline),
        )
        .await
        .unwrap()
        .unwrap();

        orchestrator.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn loop_syncs_on_interval_only_while_online() {
        let remote = MemoryRemote::new();
        let auth = signed_in();
        let connectivity = Connectivity::new(true);
        let db = DatabaseService::open_in_memory().unwrap();
        let settings = SyncSettings {
            sync_interval_secs: 60,
            ..settings()
        };
        let orchestrator = SyncOrchestrator::new(
            db.clone(),
            remote.clone(),
            auth.clone(),
            connectivity.clone(),
            &settings,
        );
        let habits = HabitService::new(db.clone(), auth);

        // The first tick fires immediately and pulls the empty remote
        let handle = orchestrator.spawn();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.state(), SyncState::Synced);
        let calls = remote.calls();

        habits.create_habit(NewHabit::named("Walk")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(remote.calls(), calls);
        assert_eq!(db.pending_count().await.unwrap(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert_eq!(remote.rows(Table::Habits).len(), 1);
        assert_eq!(db.pending_count().await.unwrap(), 0);

        connectivity.set_online(false);
        habits.create_habit(NewHabit::named("Swim")).await.unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(orchestrator.state(), SyncState::Offline);
        let calls = remote.calls();

        tokio::time::sleep(Duration::from_secs(150)).await;
        assert_eq!(remote.calls(), calls);
        assert_eq!(db.pending_count().await.unwrap(), 1);
        assert_eq!(remote.rows(Table::Habits).len(), 1);

        orchestrator.shutdown();
        handle.await.unwrap();
    }
}
