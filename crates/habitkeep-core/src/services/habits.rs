//! Habit and completion operations.
//!
//! Every write changes the record, marks it pending and enqueues the full
//! snapshot in one transaction, so the local store and the mutation queue
//! never disagree.

use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use rusqlite::Connection;

use crate::analytics::{self, HabitStats, HabitWithStats};
use crate::auth::AuthState;
use crate::changes::ChangeKind;
use crate::config::UnsyncedDeletePolicy;
use crate::db::{HabitRepository, MutationQueue, SqliteHabitRepository, SqliteMutationQueue};
use crate::error::{Error, Result};
use crate::models::{
    Habit, HabitCompletion, HabitId, HabitUpdate, MutationPayload, NewHabit, Operation,
    SyncStatus, Table,
};

use super::database::{DatabaseService, PendingChanges};

const PREFIX_MATCH_LIMIT: usize = 8;

/// Habit operations for the signed-in user, in the `Tz` calendar
#[derive(Clone)]
pub struct HabitService<Tz: TimeZone = Local> {
    db: DatabaseService,
    auth: AuthState,
    delete_policy: UnsyncedDeletePolicy,
    tz: Tz,
}

impl HabitService<Local> {
    pub fn new(db: DatabaseService, auth: AuthState) -> Self {
        Self::with_timezone(db, auth, Local)
    }
}

impl<Tz> HabitService<Tz>
where
    Tz: TimeZone + Send + Sync,
    Tz::Offset: Send + Sync,
{
    pub fn with_timezone(db: DatabaseService, auth: AuthState, tz: Tz) -> Self {
        Self {
            db,
            auth,
            delete_policy: UnsyncedDeletePolicy::default(),
            tz,
        }
    }

    #[must_use]
    pub const fn with_delete_policy(mut self, policy: UnsyncedDeletePolicy) -> Self {
        self.delete_policy = policy;
        self
    }

    pub const fn database(&self) -> &DatabaseService {
        &self.db
    }

    fn require_user(&self) -> Result<String> {
        self.auth.current_user_id().ok_or(Error::NotAuthenticated)
    }

    fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    pub async fn create_habit(&self, input: NewHabit) -> Result<Habit> {
        self.require_user()?;
        let habit = Habit::new(input)?;

        self.db
            .write(|tx, changes| {
                SqliteHabitRepository::new(tx).insert_habit(&habit)?;
                SqliteMutationQueue::new(tx).enqueue(
                    Table::Habits,
                    &habit.id.as_str(),
                    Operation::Create,
                    &MutationPayload::Habit(habit.snapshot()),
                )?;
                changes.record(Table::Habits, habit.id.as_str(), ChangeKind::Created);
                Ok(())
            })
            .await?;

        tracing::debug!("Created habit {}", habit.id);
        Ok(habit)
    }

    pub async fn update_habit(&self, id: &HabitId, update: &HabitUpdate) -> Result<Habit> {
        self.require_user()?;
        if update.is_empty() {
            return self.get_habit(id).await;
        }

        let habit = self
            .db
            .write(|tx, changes| {
                let repo = SqliteHabitRepository::new(tx);
                let mut habit = active_habit(&repo, id)?;
                habit.apply(update)?;
                repo.save_habit(&habit)?;
                SqliteMutationQueue::new(tx).enqueue(
                    Table::Habits,
                    &habit.id.as_str(),
                    Operation::Update,
                    &MutationPayload::Habit(habit.snapshot()),
                )?;
                changes.record(Table::Habits, habit.id.as_str(), ChangeKind::Updated);
                Ok(habit)
            })
            .await?;

        tracing::debug!("Updated habit {}", habit.id);
        Ok(habit)
    }

    /// Soft delete a habit
    ///
    /// A habit that never reached the remote store is handled per the
    /// configured [`UnsyncedDeletePolicy`].
    pub async fn delete_habit(&self, id: &HabitId) -> Result<()> {
        self.require_user()?;
        let policy = self.delete_policy;

        self.db
            .write(|tx, changes| {
                let repo = SqliteHabitRepository::new(tx);
                let mut habit = active_habit(&repo, id)?;
                habit.soft_delete();
                repo.save_habit(&habit)?;

                let record_id = habit.id.as_str();
                let payload = MutationPayload::Habit(habit.snapshot());
                let cancelled = queue_delete(
                    tx,
                    Table::Habits,
                    &record_id,
                    habit.server_id.as_deref(),
                    &payload,
                    policy,
                )?;
                if cancelled {
                    cancel_unpushed_completions(tx, &habit.id, changes)?;
                }
                changes.record(Table::Habits, record_id, ChangeKind::Deleted);
                Ok(())
            })
            .await?;

        tracing::debug!("Deleted habit {id}");
        Ok(())
    }

    /// Active habits, oldest first
    pub async fn list_habits(&self) -> Result<Vec<Habit>> {
        self.require_user()?;
        self.db
            .read(|conn| SqliteHabitRepository::new(conn).list_habits())
            .await
    }

    pub async fn get_habit(&self, id: &HabitId) -> Result<Habit> {
        self.require_user()?;
        self.db
            .read(|conn| active_habit(&SqliteHabitRepository::new(conn), id))
            .await
    }

    /// Resolve a full habit id or a unique prefix of one
    pub async fn resolve_habit_id(&self, raw: &str) -> Result<HabitId> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidInput("Habit id cannot be empty".to_string()));
        }
        if let Ok(id) = raw.parse::<HabitId>() {
            return Ok(id);
        }

        let matches = self
            .db
            .read(|conn| {
                SqliteHabitRepository::new(conn).list_habit_ids_by_prefix(raw, PREFIX_MATCH_LIMIT)
            })
            .await?;

        match matches.as_slice() {
            [] => Err(Error::NotFound(format!("habit {raw}"))),
            [only] => only
                .parse()
                .map_err(|_| Error::InvalidInput(format!("Invalid habit id: {only}"))),
            _ => Err(Error::InvalidInput(format!(
                "Habit id prefix {raw} is ambiguous ({} matches)",
                matches.len()
            ))),
        }
    }

    /// Record a completion at `at` (default now)
    ///
    /// Fails with [`Error::DuplicateCompletion`] when the habit already has
    /// an active completion on that local day.
    pub async fn complete_habit(
        &self,
        id: &HabitId,
        at: Option<DateTime<Utc>>,
    ) -> Result<HabitCompletion> {
        self.require_user()?;
        let completed_at = at.unwrap_or_else(Utc::now).timestamp_millis();
        let day = analytics::local_day(completed_at, &self.tz);
        let (start, end) = analytics::day_window(day, &self.tz);

        let completion = self
            .db
            .write(|tx, changes| {
                let repo = SqliteHabitRepository::new(tx);
                let habit = active_habit(&repo, id)?;
                if !repo
                    .list_completions(&habit.id, Some(start), Some(end))?
                    .is_empty()
                {
                    return Err(Error::DuplicateCompletion {
                        habit_id: habit.id.as_str(),
                        day: day.to_string(),
                    });
                }

                let completion = HabitCompletion::new(habit.id, completed_at);
                repo.insert_completion(&completion)?;
                SqliteMutationQueue::new(tx).enqueue(
                    Table::HabitCompletions,
                    &completion.id.as_str(),
                    Operation::Create,
                    &MutationPayload::Completion(completion.snapshot()),
                )?;
                changes.record(
                    Table::HabitCompletions,
                    completion.id.as_str(),
                    ChangeKind::Created,
                );
                Ok(completion)
            })
            .await?;

        tracing::debug!("Completed habit {id} on {day}");
        Ok(completion)
    }

    /// Soft delete the completion on `day` (default today)
    pub async fn uncomplete_habit(&self, id: &HabitId, day: Option<NaiveDate>) -> Result<()> {
        self.require_user()?;
        let day = day.unwrap_or_else(|| self.now().date_naive());
        let (start, end) = analytics::day_window(day, &self.tz);
        let policy = self.delete_policy;

        self.db
            .write(|tx, changes| {
                let repo = SqliteHabitRepository::new(tx);
                let Some(mut completion) = repo
                    .list_completions(id, Some(start), Some(end))?
                    .into_iter()
                    .next()
                else {
                    return Err(Error::NotFound(format!(
                        "completion of habit {id} on {day}"
                    )));
                };

                completion.soft_delete();
                repo.save_completion(&completion)?;
                let record_id = completion.id.as_str();
                queue_delete(
                    tx,
                    Table::HabitCompletions,
                    &record_id,
                    completion.server_id.as_deref(),
                    &MutationPayload::Completion(completion.snapshot()),
                    policy,
                )?;
                changes.record(Table::HabitCompletions, record_id, ChangeKind::Deleted);
                Ok(())
            })
            .await?;

        tracing::debug!("Uncompleted habit {id} on {day}");
        Ok(())
    }

    /// Active completions, newest first, optionally limited to the inclusive
    /// local-day range `from..=to`
    pub async fn list_completions(
        &self,
        id: &HabitId,
        range: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<Vec<HabitCompletion>> {
        self.require_user()?;
        let (start, end) = match range {
            Some((from, to)) => (
                Some(analytics::day_window(from, &self.tz).0),
                Some(analytics::day_window(to, &self.tz).1),
            ),
            None => (None, None),
        };
        self.db
            .read(|conn| SqliteHabitRepository::new(conn).list_completions(id, start, end))
            .await
    }

    pub async fn is_completed_today(&self, id: &HabitId) -> Result<bool> {
        let completions = self.list_completions(id, None).await?;
        Ok(analytics::is_completed_on(
            &completions,
            self.now().date_naive(),
            &self.tz,
        ))
    }

    pub async fn habit_streak(&self, id: &HabitId) -> Result<u32> {
        let completions = self.list_completions(id, None).await?;
        Ok(analytics::current_streak(
            &completions,
            self.now().date_naive(),
            &self.tz,
        ))
    }

    pub async fn habit_stats(&self, id: &HabitId) -> Result<HabitStats> {
        let completions = self.list_completions(id, None).await?;
        Ok(HabitStats::compute(&completions, &self.now()))
    }

    /// Every active habit with its statistics
    pub async fn habits_with_stats(&self) -> Result<Vec<HabitWithStats>> {
        self.require_user()?;
        let rows = self
            .db
            .read(|conn| {
                let repo = SqliteHabitRepository::new(conn);
                repo.list_habits()?
                    .into_iter()
                    .map(|habit| {
                        let completions = repo.list_completions(&habit.id, None, None)?;
                        Ok((habit, completions))
                    })
                    .collect::<Result<Vec<_>>>()
            })
            .await?;

        let now = self.now();
        Ok(rows
            .into_iter()
            .map(|(habit, completions)| HabitWithStats {
                stats: HabitStats::compute(&completions, &now),
                habit,
            })
            .collect())
    }
}

fn active_habit(repo: &SqliteHabitRepository<'_>, id: &HabitId) -> Result<Habit> {
    repo.get_habit(id)?
        .filter(|habit| !habit.is_deleted())
        .ok_or_else(|| Error::NotFound(format!("habit {id}")))
}

/// Enqueue a delete, or cancel the record's pending create
///
/// Returns `true` when the pending create was cancelled instead.
fn queue_delete(
    conn: &Connection,
    table: Table,
    record_id: &str,
    server_id: Option<&str>,
    payload: &MutationPayload,
    policy: UnsyncedDeletePolicy,
) -> Result<bool> {
    let queue = SqliteMutationQueue::new(conn);

    if policy == UnsyncedDeletePolicy::CancelPendingCreate
        && server_id.is_none()
        && queue.has_pending_create(table, record_id)?
    {
        let removed = queue.remove_for_record(table, record_id)?;
        SqliteHabitRepository::new(conn).set_sync_status(table, record_id, SyncStatus::Synced)?;
        tracing::debug!("Cancelled {removed} unpushed entries for {table}:{record_id}");
        return Ok(true);
    }

    queue.enqueue(table, record_id, Operation::Delete, payload)?;
    Ok(false)
}

/// Drop queued completions of a habit whose create was cancelled
///
/// They reference a parent that will never get a server id, so they could
/// never be pushed.
fn cancel_unpushed_completions(
    conn: &Connection,
    habit_id: &HabitId,
    changes: &mut PendingChanges,
) -> Result<()> {
    let queue = SqliteMutationQueue::new(conn);
    let repo = SqliteHabitRepository::new(conn);

    let mut orphaned = Vec::new();
    for entry in queue.drain()? {
        let Ok(mutation) = entry.decode() else {
            continue;
        };
        if let MutationPayload::Completion(snapshot) = &mutation.payload {
            if snapshot.habit_id == *habit_id && !orphaned.contains(&entry.record_id) {
                orphaned.push(entry.record_id.clone());
            }
        }
    }

    for record_id in orphaned {
        if repo
            .server_id_of(Table::HabitCompletions, &record_id)?
            .is_some()
        {
            continue;
        }
        queue.remove_for_record(Table::HabitCompletions, &record_id)?;
        repo.set_sync_status(Table::HabitCompletions, &record_id, SyncStatus::Synced)?;
        changes.record(Table::HabitCompletions, record_id, ChangeKind::Synced);
    }
    Ok(())
}
