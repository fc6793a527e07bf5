//! Habit completion model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use super::habit::HabitId;
use super::status::SyncStatus;

/// A unique local identifier for a completion, using UUID v7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompletionId(Uuid);

impl CompletionId {
    /// Create a new unique completion ID using UUID v7.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID.
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for CompletionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompletionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CompletionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// One day's check-off of a habit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitCompletion {
    /// Local identifier.
    pub id: CompletionId,
    /// Remote identity, assigned by the first successful create push.
    pub server_id: Option<String>,
    /// Owning habit (local id).
    pub habit_id: HabitId,
    /// When the habit was done (Unix ms).
    pub completed_at: i64,
    /// Creation timestamp (Unix ms).
    pub created_at: i64,
    /// Last update timestamp (Unix ms).
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms).
    pub deleted_at: Option<i64>,
    /// Sync state relative to the remote store.
    pub sync_status: SyncStatus,
}

/// Full field snapshot of a completion captured when a mutation is queued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionSnapshot {
    pub server_id: Option<String>,
    pub habit_id: HabitId,
    pub completed_at: i64,
    pub deleted_at: Option<i64>,
}

impl HabitCompletion {
    /// Create a new pending completion.
    #[must_use]
    pub fn new(habit_id: HabitId, completed_at: i64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: CompletionId::new(),
            server_id: None,
            habit_id,
            completed_at,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sync_status: SyncStatus::Pending,
        }
    }

    /// Soft delete, re-marking pending.
    pub fn soft_delete(&mut self) {
        let now = chrono::Utc::now().timestamp_millis();
        self.deleted_at = Some(now);
        self.updated_at = now.max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
    }

    /// Whether the completion has been soft deleted.
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Snapshot of every synced field.
    #[must_use]
    pub fn snapshot(&self) -> CompletionSnapshot {
        CompletionSnapshot {
            server_id: self.server_id.clone(),
            habit_id: self.habit_id,
            completed_at: self.completed_at,
            deleted_at: self.deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_id_parse() {
        let id = CompletionId::new();
        let parsed: CompletionId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_completion_new_pending() {
        let habit_id = HabitId::new();
        let completion = HabitCompletion::new(habit_id, 1_700_000_000_000);
        assert_eq!(completion.habit_id, habit_id);
        assert_eq!(completion.sync_status, SyncStatus::Pending);
        assert!(!completion.is_deleted());
    }

    #[test]
    fn test_soft_delete() {
        let mut completion = HabitCompletion::new(HabitId::new(), 1_700_000_000_000);
        completion.sync_status = SyncStatus::Synced;
        completion.soft_delete();
        assert!(completion.is_deleted());
        assert_eq!(completion.sync_status, SyncStatus::Pending);
        assert_eq!(completion.snapshot().deleted_at, completion.deleted_at);
    }
}
