//! Error types for habitkeep-core

use thiserror::Error;

/// Result type alias using habitkeep-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in habitkeep-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("Database error: {0}")]
    Database(String),

    /// `SQLite` error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No signed-in user
    #[error("Not authenticated")]
    NotAuthenticated,

    /// A completion already exists for this habit on this day
    #[error("Habit {habit_id} already completed on {day}")]
    DuplicateCompletion {
        /// Local habit id
        habit_id: String,
        /// Local calendar day (`YYYY-MM-DD`)
        day: String,
    },

    /// Remote store rejected or failed a request
    #[error("Remote request failed: {0}")]
    RemoteRequestFailed(String),

    /// A queued mutation failed to push and stays queued
    #[error("Failed to sync {table}:{record_id} (attempt {retry_count}): {last_error}")]
    QueueItemFailed {
        /// Table the entry targets
        table: String,
        /// Local record id the entry targets
        record_id: String,
        /// Retry count after this failure
        retry_count: i64,
        /// Error recorded on the entry
        last_error: String,
    },

    /// A sync cycle is already running
    #[error("Sync already in progress")]
    SyncAlreadyInProgress,

    /// Connectivity is down
    #[error("Offline; sync skipped")]
    Offline,
}
