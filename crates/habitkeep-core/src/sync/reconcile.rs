//! Push and pull against the remote store.
//!
//! Push drains the mutation queue in FIFO order, one remote call per entry.
//! Pull fetches rows changed since the per-collection checkpoint and applies
//! them with remote-wins semantics, keyed by server id.

use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use rusqlite::Connection;
use serde_json::{json, Value};
use tokio::sync::watch;

use crate::changes::ChangeKind;
use crate::db::{
    HabitRepository, MutationQueue, SqliteHabitRepository, SqliteMutationQueue,
    SqliteSyncStateRepository, SyncStateRepository,
};
use crate::error::{Error, Result};
use crate::models::{
    CompletionId, DecodedMutation, Habit, HabitCompletion, HabitId, MutationPayload, Operation,
    QueueEntry, SyncStatus, Table,
};
use crate::services::{DatabaseService, PendingChanges};
use crate::util::millis_to_utc;

use super::remote::{
    row_id, row_updated_at, RemoteCompletion, RemoteError, RemoteHabit, RemoteResult,
    RemoteStore,
};
use super::{wait_for_shutdown, SyncReport};

const CANCELLED: &str = "Sync cancelled";

/// What a queue entry turns into on the wire
#[derive(Debug, PartialEq)]
enum PushRequest {
    Insert(Value),
    Update { server_id: String, patch: Value },
}

/// One sync cycle's view of the store, the remote and the signed-in user
pub(crate) struct Reconciler<'a, R: RemoteStore> {
    db: &'a DatabaseService,
    remote: &'a R,
    user_id: &'a str,
    timeout: Duration,
    shutdown: watch::Receiver<bool>,
}

impl<'a, R: RemoteStore> Reconciler<'a, R> {
    pub(crate) const fn new(
        db: &'a DatabaseService,
        remote: &'a R,
        user_id: &'a str,
        timeout: Duration,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            db,
            remote,
            user_id,
            timeout,
            shutdown,
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Run a remote call under the per-call deadline, abandoning it on shutdown
    async fn call<T>(&self, request: impl Future<Output = RemoteResult<T>>) -> RemoteResult<T> {
        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            biased;
            () = wait_for_shutdown(&mut shutdown) => Err(RemoteError::Cancelled),
            result = tokio::time::timeout(self.timeout, request) => {
                result.unwrap_or(Err(RemoteError::Timeout(self.timeout)))
            }
        }
    }

    /// Push every queued entry in order
    ///
    /// A failed entry stays queued with its retry count bumped; the entries
    /// after it are still attempted.
    pub(crate) async fn push_all(&self, report: &mut SyncReport) {
        let entries = match self.db.list_queue().await {
            Ok(entries) => entries,
            Err(error) => {
                report.errors.push(format!("Failed to read sync queue: {error}"));
                return;
            }
        };
        if !entries.is_empty() {
            tracing::debug!("Pushing {} queued mutations", entries.len());
        }

        for entry in entries {
            if self.is_cancelled() {
                report.errors.push(CANCELLED.to_string());
                return;
            }

            match self.push_entry(&entry).await {
                Ok(()) => report.pushed += 1,
                Err(_) if self.is_cancelled() => {
                    report.errors.push(CANCELLED.to_string());
                    return;
                }
                Err(error) => {
                    let failure = self.record_failure(&entry, error.to_string()).await;
                    tracing::warn!("{failure}");
                    report.errors.push(failure.to_string());
                }
            }
        }
    }

    async fn push_entry(&self, entry: &QueueEntry) -> Result<()> {
        let mutation = entry.decode()?;
        let request = self
            .db
            .read(|conn| build_push_request(conn, entry, &mutation, self.user_id))
            .await?;

        match request {
            PushRequest::Insert(row) => {
                let stored = self.call(self.remote.insert(mutation.table, row)).await?;
                let server_id = row_id(&stored)?;
                self.db
                    .write(|tx, changes| {
                        let assigned = SqliteHabitRepository::new(tx).assign_server_id(
                            mutation.table,
                            &entry.record_id,
                            &server_id,
                        )?;
                        // A retried create whose first insert landed remotely leaves
                        // an orphan row that later pulls import as a second record
                        if !assigned {
                            tracing::warn!(
                                "{}:{} already had a server id; remote row {server_id} is a duplicate",
                                mutation.table,
                                entry.record_id
                            );
                        }
                        finish_entry(tx, changes, mutation.table, entry)
                    })
                    .await?;
                tracing::debug!(
                    "Created {}:{} remotely as {server_id}",
                    mutation.table,
                    entry.record_id
                );
            }
            PushRequest::Update { server_id, patch } => {
                self.call(self.remote.update(mutation.table, &server_id, patch))
                    .await?;
                self.db
                    .write(|tx, changes| finish_entry(tx, changes, mutation.table, entry))
                    .await?;
                tracing::debug!(
                    "Pushed {} for {}:{}",
                    mutation.operation,
                    mutation.table,
                    entry.record_id
                );
            }
        }
        Ok(())
    }

    async fn record_failure(&self, entry: &QueueEntry, last_error: String) -> Error {
        let recorded = self
            .db
            .write(|tx, changes| {
                let retry_count =
                    SqliteMutationQueue::new(tx).record_failure(entry.id, &last_error)?;
                if let Ok(table) = entry.table_name.parse::<Table>() {
                    if SqliteHabitRepository::new(tx).set_sync_status(
                        table,
                        &entry.record_id,
                        SyncStatus::Error,
                    )? {
                        changes.record(table, entry.record_id.clone(), ChangeKind::Synced);
                    }
                }
                Ok(retry_count)
            })
            .await;

        let retry_count = recorded.unwrap_or_else(|error| {
            tracing::error!(
                "Failed to record push failure for entry {}: {error}",
                entry.id
            );
            entry.retry_count + 1
        });

        Error::QueueItemFailed {
            table: entry.table_name.clone(),
            record_id: entry.record_id.clone(),
            retry_count,
            last_error,
        }
    }

    /// Pull every collection, parents before children
    pub(crate) async fn pull_all(&self, report: &mut SyncReport) {
        for table in Table::ALL {
            if self.is_cancelled() {
                report.errors.push(CANCELLED.to_string());
                return;
            }
            self.pull_table(table, report).await;
        }
    }

    /// Fetch and apply one collection, then move its checkpoint
    ///
    /// The checkpoint only advances past rows that applied: all applied moves
    /// it to the pull start, any failure pins it at the earliest failed row,
    /// a failed fetch leaves it alone.
    async fn pull_table(&self, table: Table, report: &mut SyncReport) {
        let started = Utc::now().timestamp_millis();
        let checkpoint = match self
            .db
            .read(|conn| SqliteSyncStateRepository::new(conn).checkpoint(table))
            .await
        {
            Ok(checkpoint) => checkpoint,
            Err(error) => {
                report
                    .errors
                    .push(format!("Failed to read {table} checkpoint: {error}"));
                return;
            }
        };

        let rows = match self
            .call(
                self.remote
                    .select_changed(table, checkpoint.map(millis_to_utc)),
            )
            .await
        {
            Ok(rows) => rows,
            Err(error) => {
                let message = format!("Failed to pull {table}: {error}");
                tracing::warn!("{message}");
                report.errors.push(message);
                return;
            }
        };

        let mut failed_at: Vec<Option<i64>> = Vec::new();
        for row in &rows {
            match self
                .db
                .write(|tx, changes| apply_remote_row(tx, changes, table, row))
                .await
            {
                Ok(()) => report.pulled += 1,
                Err(error) => {
                    let id = row_id(row).unwrap_or_else(|_| "<no id>".to_string());
                    let message = format!("Failed to apply {table} row {id}: {error}");
                    tracing::warn!("{message}");
                    report.errors.push(message);
                    failed_at.push(row_updated_at(row));
                }
            }
        }

        let next = if failed_at.is_empty() {
            Some(started)
        } else if failed_at.iter().all(Option::is_some) {
            failed_at.into_iter().flatten().min()
        } else {
            None
        };

        if let Some(next) = next {
            if let Err(error) = self
                .db
                .write(|tx, _| SqliteSyncStateRepository::new(tx).set_checkpoint(table, next))
                .await
            {
                report
                    .errors
                    .push(format!("Failed to store {table} checkpoint: {error}"));
            }
        }
        tracing::debug!("Pulled {} {table} rows", rows.len());
    }
}

/// Remove a pushed entry; the record is synced once nothing else is queued
fn finish_entry(
    conn: &Connection,
    changes: &mut PendingChanges,
    table: Table,
    entry: &QueueEntry,
) -> Result<()> {
    let queue = SqliteMutationQueue::new(conn);
    queue.remove(entry.id)?;
    if !queue.has_entries_for(table, &entry.record_id)?
        && SqliteHabitRepository::new(conn).set_sync_status(
            table,
            &entry.record_id,
            SyncStatus::Synced,
        )?
    {
        changes.record(table, entry.record_id.clone(), ChangeKind::Synced);
    }
    Ok(())
}

fn build_push_request(
    conn: &Connection,
    entry: &QueueEntry,
    mutation: &DecodedMutation,
    user_id: &str,
) -> Result<PushRequest> {
    let repo = SqliteHabitRepository::new(conn);
    let now = Utc::now();

    if mutation.operation == Operation::Create {
        let row = match &mutation.payload {
            MutationPayload::Habit(snapshot) => serde_json::to_value(RemoteHabit {
                id: None,
                user_id: Some(user_id.to_string()),
                name: snapshot.name.clone(),
                description: snapshot.description.clone(),
                color: snapshot.color.clone(),
                icon: snapshot.icon.clone(),
                target_frequency: snapshot.target_frequency,
                created_at: None,
                updated_at: None,
                deleted_at: snapshot.deleted_at.map(millis_to_utc),
            })?,
            MutationPayload::Completion(snapshot) => {
                let habit_server_id = repo
                    .server_id_of(Table::Habits, &snapshot.habit_id.as_str())?
                    .ok_or_else(|| {
                        Error::InvalidInput(format!(
                            "Habit {} has not reached the remote store yet",
                            snapshot.habit_id
                        ))
                    })?;
                serde_json::to_value(RemoteCompletion {
                    id: None,
                    habit_id: habit_server_id,
                    user_id: Some(user_id.to_string()),
                    completed_at: millis_to_utc(snapshot.completed_at),
                    created_at: None,
                    updated_at: None,
                    deleted_at: snapshot.deleted_at.map(millis_to_utc),
                })?
            }
        };
        return Ok(PushRequest::Insert(row));
    }

    // Snapshots queued before the create was pushed carry no server id; the
    // record has one by now if an earlier entry created it
    let server_id = match mutation.payload.server_id() {
        Some(server_id) => server_id.to_string(),
        None => repo
            .server_id_of(mutation.table, &entry.record_id)?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "remote identity of {}:{}",
                    mutation.table, entry.record_id
                ))
            })?,
    };

    let patch = match (&mutation.operation, &mutation.payload) {
        (Operation::Delete, _) => json!({ "deleted_at": now, "updated_at": now }),
        (_, MutationPayload::Habit(snapshot)) => json!({
            "name": snapshot.name,
            "description": snapshot.description,
            "color": snapshot.color,
            "icon": snapshot.icon,
            "target_frequency": snapshot.target_frequency,
            "deleted_at": snapshot.deleted_at.map(millis_to_utc),
            "updated_at": now,
        }),
        (_, MutationPayload::Completion(snapshot)) => json!({
            "completed_at": millis_to_utc(snapshot.completed_at),
            "deleted_at": snapshot.deleted_at.map(millis_to_utc),
            "updated_at": now,
        }),
    };
    Ok(PushRequest::Update { server_id, patch })
}

fn apply_remote_row(
    conn: &Connection,
    changes: &mut PendingChanges,
    table: Table,
    row: &Value,
) -> Result<()> {
    match table {
        Table::Habits => apply_remote_habit(conn, changes, serde_json::from_value(row.clone())?),
        Table::HabitCompletions => {
            apply_remote_completion(conn, changes, serde_json::from_value(row.clone())?)
        }
    }
}

/// Whether a pulled row must leave the local record alone
///
/// Queued local writes have not reached the remote yet. Overwriting the record
/// would lose them locally (a pulled row is always live, so a queued delete
/// would be undone); they are pushed next cycle and a later pull converges.
fn has_queued_writes(conn: &Connection, table: Table, record_id: &str) -> Result<bool> {
    let queued = SqliteMutationQueue::new(conn).has_entries_for(table, record_id)?;
    if queued {
        tracing::debug!("Kept local {table}:{record_id}; it still has queued writes");
    }
    Ok(queued)
}

fn apply_remote_habit(
    conn: &Connection,
    changes: &mut PendingChanges,
    remote: RemoteHabit,
) -> Result<()> {
    let server_id = remote
        .id
        .ok_or_else(|| Error::InvalidInput("remote habit has no id".to_string()))?;
    let repo = SqliteHabitRepository::new(conn);
    let updated_at = remote
        .updated_at
        .map_or_else(|| Utc::now().timestamp_millis(), |at| at.timestamp_millis());
    let deleted_at = remote.deleted_at.map(|at| at.timestamp_millis());

    if let Some(mut local) = repo.find_habit_by_server_id(&server_id)? {
        if has_queued_writes(conn, Table::Habits, &local.id.as_str())? {
            return Ok(());
        }
        let before = local.clone();
        local.name = remote.name;
        local.description = remote.description;
        local.color = remote.color;
        local.icon = remote.icon;
        local.target_frequency = remote.target_frequency;
        local.updated_at = updated_at;
        local.deleted_at = deleted_at;
        local.sync_status = SyncStatus::Synced;

        if local != before {
            repo.save_habit(&local)?;
            changes.record(Table::Habits, local.id.as_str(), ChangeKind::Updated);
        }
        return Ok(());
    }

    let habit = Habit {
        id: HabitId::new(),
        server_id: Some(server_id),
        name: remote.name,
        description: remote.description,
        color: remote.color,
        icon: remote.icon,
        target_frequency: remote.target_frequency,
        created_at: remote
            .created_at
            .map_or(updated_at, |at| at.timestamp_millis()),
        updated_at,
        deleted_at,
        sync_status: SyncStatus::Synced,
    };
    repo.insert_habit(&habit)?;
    changes.record(Table::Habits, habit.id.as_str(), ChangeKind::Created);
    Ok(())
}

fn apply_remote_completion(
    conn: &Connection,
    changes: &mut PendingChanges,
    remote: RemoteCompletion,
) -> Result<()> {
    let server_id = remote
        .id
        .ok_or_else(|| Error::InvalidInput("remote completion has no id".to_string()))?;
    let repo = SqliteHabitRepository::new(conn);
    let habit = repo
        .find_habit_by_server_id(&remote.habit_id)?
        .ok_or_else(|| {
            Error::NotFound(format!(
                "habit {} for completion {server_id}",
                remote.habit_id
            ))
        })?;
    let updated_at = remote
        .updated_at
        .map_or_else(|| Utc::now().timestamp_millis(), |at| at.timestamp_millis());
    let completed_at = remote.completed_at.timestamp_millis();
    let deleted_at = remote.deleted_at.map(|at| at.timestamp_millis());

    if let Some(mut local) = repo.find_completion_by_server_id(&server_id)? {
        if has_queued_writes(conn, Table::HabitCompletions, &local.id.as_str())? {
            return Ok(());
        }
        let before = local.clone();
        local.habit_id = habit.id;
        local.completed_at = completed_at;
        local.updated_at = updated_at;
        local.deleted_at = deleted_at;
        local.sync_status = SyncStatus::Synced;

        if local != before {
            repo.save_completion(&local)?;
            changes.record(
                Table::HabitCompletions,
                local.id.as_str(),
                ChangeKind::Updated,
            );
        }
        return Ok(());
    }

    let completion = HabitCompletion {
        id: CompletionId::new(),
        server_id: Some(server_id),
        habit_id: habit.id,
        completed_at,
        created_at: remote
            .created_at
            .map_or(updated_at, |at| at.timestamp_millis()),
        updated_at,
        deleted_at,
        sync_status: SyncStatus::Synced,
    };
    repo.insert_completion(&completion)?;
    changes.record(
        Table::HabitCompletions,
        completion.id.as_str(),
        ChangeKind::Created,
    );
    Ok(())
}
