//! Explicit table descriptions and row mappers
//!
//! Column order here is the order used by every `SELECT` and `INSERT` in the
//! repositories, so the mappers below can read by index.

use rusqlite::types::Type;
use rusqlite::Row;

use crate::models::{CompletionId, Habit, HabitCompletion, HabitId, QueueEntry, SyncStatus};

/// Static description of a local table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [&'static str],
}

impl TableSchema {
    /// Comma-separated column list for `SELECT`
    pub fn select_columns(&self) -> String {
        self.columns.join(", ")
    }

    /// `INSERT` statement binding every column positionally
    pub fn insert_sql(&self) -> String {
        let placeholders = (1..=self.columns.len())
            .map(|index| format!("?{index}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!(
            "INSERT INTO {} ({}) VALUES ({placeholders})",
            self.name,
            self.select_columns()
        )
    }

    /// `UPDATE ... WHERE id = ?1` setting every column after `id`
    ///
    /// `server_id` is only written while it is still NULL, so an identity
    /// assigned by a push is never cleared or replaced by a later write.
    pub fn update_sql(&self) -> String {
        let assignments = self
            .columns
            .iter()
            .enumerate()
            .skip(1)
            .map(|(index, column)| {
                if *column == "server_id" {
                    format!("server_id = COALESCE(server_id, ?{})", index + 1)
                } else {
                    format!("{column} = ?{}", index + 1)
                }
            })
            .collect::<Vec<_>>()
            .join(", ");
        format!("UPDATE {} SET {assignments} WHERE id = ?1", self.name)
    }
}

pub const HABITS: TableSchema = TableSchema {
    name: "habits",
    columns: &[
        "id",
        "server_id",
        "name",
        "description",
        "color",
        "icon",
        "target_frequency",
        "created_at",
        "updated_at",
        "deleted_at",
        "is_synced",
        "sync_status",
    ],
};

pub const HABIT_COMPLETIONS: TableSchema = TableSchema {
    name: "habit_completions",
    columns: &[
        "id",
        "server_id",
        "habit_id",
        "completed_at",
        "created_at",
        "updated_at",
        "deleted_at",
        "is_synced",
        "sync_status",
    ],
};

pub const SYNC_QUEUE: TableSchema = TableSchema {
    name: "sync_queue",
    columns: &[
        "id",
        "table_name",
        "record_id",
        "operation",
        "data",
        "created_at",
        "retry_count",
        "last_error",
    ],
};

/// Map a `habits` row selected with [`HABITS`] columns
pub fn habit_from_row(row: &Row<'_>) -> rusqlite::Result<Habit> {
    let id: String = row.get(0)?;
    let status: String = row.get(11)?;
    Ok(Habit {
        id: id
            .parse::<HabitId>()
            .map_err(|error| conversion_error(0, error))?,
        server_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        color: row.get(4)?,
        icon: row.get(5)?,
        target_frequency: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
        deleted_at: row.get(9)?,
        sync_status: parse_status(11, &status)?,
    })
}

/// Map a `habit_completions` row selected with [`HABIT_COMPLETIONS`] columns
pub fn completion_from_row(row: &Row<'_>) -> rusqlite::Result<HabitCompletion> {
    let id: String = row.get(0)?;
    let habit_id: String = row.get(2)?;
    let status: String = row.get(8)?;
    Ok(HabitCompletion {
        id: id
            .parse::<CompletionId>()
            .map_err(|error| conversion_error(0, error))?,
        server_id: row.get(1)?,
        habit_id: habit_id
            .parse::<HabitId>()
            .map_err(|error| conversion_error(2, error))?,
        completed_at: row.get(3)?,
        created_at: row.get(4)?,
        updated_at: row.get(5)?,
        deleted_at: row.get(6)?,
        sync_status: parse_status(8, &status)?,
    })
}

/// Map a `sync_queue` row selected with [`SYNC_QUEUE`] columns
pub fn queue_entry_from_row(row: &Row<'_>) -> rusqlite::Result<QueueEntry> {
    Ok(QueueEntry {
        id: row.get(0)?,
        table_name: row.get(1)?,
        record_id: row.get(2)?,
        operation: row.get(3)?,
        data: row.get(4)?,
        created_at: row.get(5)?,
        retry_count: row.get(6)?,
        last_error: row.get(7)?,
    })
}

fn parse_status(index: usize, value: &str) -> rusqlite::Result<SyncStatus> {
    value
        .parse::<SyncStatus>()
        .map_err(|error| conversion_error(index, error))
}

fn conversion_error(
    index: usize,
    error: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(error))
}
