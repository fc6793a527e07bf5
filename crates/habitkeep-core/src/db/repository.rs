//! Habit and completion repository implementation

#![allow(clippy::cast_possible_wrap)] // SQLite uses i64 for LIMIT

use crate::error::{Error, Result};
use crate::models::{CompletionId, Habit, HabitCompletion, HabitId, SyncStatus, Table};
use rusqlite::{params, Connection, OptionalExtension};

use super::schema::{completion_from_row, habit_from_row, HABITS, HABIT_COMPLETIONS};

/// Trait for habit and completion storage operations
pub trait HabitRepository {
    /// Insert a new habit row
    fn insert_habit(&self, habit: &Habit) -> Result<()>;

    /// Overwrite a habit row with the given values
    fn save_habit(&self, habit: &Habit) -> Result<()>;

    /// Get a habit by local ID, including soft-deleted ones
    fn get_habit(&self, id: &HabitId) -> Result<Option<Habit>>;

    /// Find a habit by its remote identity
    fn find_habit_by_server_id(&self, server_id: &str) -> Result<Option<Habit>>;

    /// List active habits, oldest first
    fn list_habits(&self) -> Result<Vec<Habit>>;

    /// List active habit IDs starting with the given prefix
    fn list_habit_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>>;

    /// Insert a new completion row
    fn insert_completion(&self, completion: &HabitCompletion) -> Result<()>;

    /// Overwrite a completion row with the given values
    fn save_completion(&self, completion: &HabitCompletion) -> Result<()>;

    /// Get a completion by local ID, including soft-deleted ones
    fn get_completion(&self, id: &CompletionId) -> Result<Option<HabitCompletion>>;

    /// Find a completion by its remote identity
    fn find_completion_by_server_id(&self, server_id: &str) -> Result<Option<HabitCompletion>>;

    /// Active completions of a habit with `start <= completed_at < end`, newest first
    fn list_completions(
        &self,
        habit_id: &HabitId,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<HabitCompletion>>;

    /// Record the remote identity of a record that does not have one yet
    ///
    /// Returns `false` when the record is gone or already carries an identity.
    fn assign_server_id(&self, table: Table, record_id: &str, server_id: &str) -> Result<bool>;

    /// Current remote identity of a record
    fn server_id_of(&self, table: Table, record_id: &str) -> Result<Option<String>>;

    /// Set a record's sync status; returns `false` when the record is gone
    fn set_sync_status(&self, table: Table, record_id: &str, status: SyncStatus) -> Result<bool>;
}

/// `SQLite` implementation of `HabitRepository`
pub struct SqliteHabitRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteHabitRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn query_habit(&self, column: &str, value: &str) -> Result<Option<Habit>> {
        let sql = format!(
            "SELECT {} FROM habits WHERE {column} = ?1",
            HABITS.select_columns()
        );
        Ok(self
            .conn
            .query_row(&sql, params![value], habit_from_row)
            .optional()?)
    }

    fn query_completion(&self, column: &str, value: &str) -> Result<Option<HabitCompletion>> {
        let sql = format!(
            "SELECT {} FROM habit_completions WHERE {column} = ?1",
            HABIT_COMPLETIONS.select_columns()
        );
        Ok(self
            .conn
            .query_row(&sql, params![value], completion_from_row)
            .optional()?)
    }
}

impl HabitRepository for SqliteHabitRepository<'_> {
    fn insert_habit(&self, habit: &Habit) -> Result<()> {
        self.conn.execute(
            &HABITS.insert_sql(),
            params![
                habit.id.as_str(),
                habit.server_id,
                habit.name,
                habit.description,
                habit.color,
                habit.icon,
                habit.target_frequency,
                habit.created_at,
                habit.updated_at,
                habit.deleted_at,
                habit.sync_status.is_synced(),
                habit.sync_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn save_habit(&self, habit: &Habit) -> Result<()> {
        let rows = self.conn.execute(
            &HABITS.update_sql(),
            params![
                habit.id.as_str(),
                habit.server_id,
                habit.name,
                habit.description,
                habit.color,
                habit.icon,
                habit.target_frequency,
                habit.created_at,
                habit.updated_at,
                habit.deleted_at,
                habit.sync_status.is_synced(),
                habit.sync_status.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("habit {}", habit.id)));
        }
        Ok(())
    }

    fn get_habit(&self, id: &HabitId) -> Result<Option<Habit>> {
        self.query_habit("id", &id.as_str())
    }

    fn find_habit_by_server_id(&self, server_id: &str) -> Result<Option<Habit>> {
        self.query_habit("server_id", server_id)
    }

    fn list_habits(&self) -> Result<Vec<Habit>> {
        let sql = format!(
            "SELECT {} FROM habits WHERE deleted_at IS NULL ORDER BY created_at ASC, id ASC",
            HABITS.select_columns()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let habits = stmt
            .query_map([], habit_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(habits)
    }

    fn list_habit_ids_by_prefix(&self, prefix: &str, limit: usize) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT id FROM habits
             WHERE deleted_at IS NULL AND substr(id, 1, length(?1)) = ?1
             ORDER BY id ASC
             LIMIT ?2",
        )?;
        let ids = stmt
            .query_map(params![prefix, limit as i64], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    fn insert_completion(&self, completion: &HabitCompletion) -> Result<()> {
        self.conn.execute(
            &HABIT_COMPLETIONS.insert_sql(),
            params![
                completion.id.as_str(),
                completion.server_id,
                completion.habit_id.as_str(),
                completion.completed_at,
                completion.created_at,
                completion.updated_at,
                completion.deleted_at,
                completion.sync_status.is_synced(),
                completion.sync_status.as_str(),
            ],
        )?;
        Ok(())
    }

    fn save_completion(&self, completion: &HabitCompletion) -> Result<()> {
        let rows = self.conn.execute(
            &HABIT_COMPLETIONS.update_sql(),
            params![
                completion.id.as_str(),
                completion.server_id,
                completion.habit_id.as_str(),
                completion.completed_at,
                completion.created_at,
                completion.updated_at,
                completion.deleted_at,
                completion.sync_status.is_synced(),
                completion.sync_status.as_str(),
            ],
        )?;

        if rows == 0 {
            return Err(Error::NotFound(format!("completion {}", completion.id)));
        }
        Ok(())
    }

    fn get_completion(&self, id: &CompletionId) -> Result<Option<HabitCompletion>> {
        self.query_completion("id", &id.as_str())
    }

    fn find_completion_by_server_id(&self, server_id: &str) -> Result<Option<HabitCompletion>> {
        self.query_completion("server_id", server_id)
    }

    fn list_completions(
        &self,
        habit_id: &HabitId,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<Vec<HabitCompletion>> {
        let sql = format!(
            "SELECT {} FROM habit_completions
             WHERE habit_id = ?1
               AND deleted_at IS NULL
               AND completed_at >= ?2
               AND completed_at < ?3
             ORDER BY completed_at DESC",
            HABIT_COMPLETIONS.select_columns()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let completions = stmt
            .query_map(
                params![
                    habit_id.as_str(),
                    start.unwrap_or(i64::MIN),
                    end.unwrap_or(i64::MAX)
                ],
                completion_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(completions)
    }

    fn assign_server_id(&self, table: Table, record_id: &str, server_id: &str) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET server_id = ?1 WHERE id = ?2 AND server_id IS NULL",
            table.as_str()
        );
        let rows = self.conn.execute(&sql, params![server_id, record_id])?;
        Ok(rows > 0)
    }

    fn server_id_of(&self, table: Table, record_id: &str) -> Result<Option<String>> {
        let sql = format!("SELECT server_id FROM {} WHERE id = ?1", table.as_str());
        Ok(self
            .conn
            .query_row(&sql, params![record_id], |row| row.get(0))
            .optional()?
            .flatten())
    }

    fn set_sync_status(&self, table: Table, record_id: &str, status: SyncStatus) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET sync_status = ?1, is_synced = ?2 WHERE id = ?3",
            table.as_str()
        );
        let rows = self.conn.execute(
            &sql,
            params![status.as_str(), status.is_synced(), record_id],
        )?;
        Ok(rows > 0)
    }
}
