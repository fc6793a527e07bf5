//! Durable sync checkpoints

use crate::error::{Error, Result};
use crate::models::Table;
use rusqlite::{params, Connection, OptionalExtension};

/// Trait for sync bookkeeping that must survive restarts
pub trait SyncStateRepository {
    /// Last pull checkpoint for a collection (Unix ms), if any
    fn checkpoint(&self, table: Table) -> Result<Option<i64>>;

    /// Store the pull checkpoint for a collection
    fn set_checkpoint(&self, table: Table, checkpoint_ms: i64) -> Result<()>;
}

/// `SQLite` implementation of `SyncStateRepository`
pub struct SqliteSyncStateRepository<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteSyncStateRepository<'a> {
    /// Create a new repository with the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self
            .conn
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?)
    }

    fn set_value(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }
}

fn checkpoint_key(table: Table) -> String {
    format!("checkpoint:{table}")
}

impl SyncStateRepository for SqliteSyncStateRepository<'_> {
    fn checkpoint(&self, table: Table) -> Result<Option<i64>> {
        self.get_value(&checkpoint_key(table))?
            .map(|value| {
                value.parse::<i64>().map_err(|_| {
                    Error::Database(format!("Corrupt checkpoint for {table}: {value}"))
                })
            })
            .transpose()
    }

    fn set_checkpoint(&self, table: Table, checkpoint_ms: i64) -> Result<()> {
        self.set_value(&checkpoint_key(table), &checkpoint_ms.to_string())
    }
}
