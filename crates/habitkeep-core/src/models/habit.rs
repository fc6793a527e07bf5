//! Habit model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Error, Result};

use super::status::SyncStatus;

/// Default habit color
pub const DEFAULT_COLOR: &str = "#3B82F6";
/// Default habit icon
pub const DEFAULT_ICON: &str = "check-circle";
/// Default target frequency (days per week)
pub const DEFAULT_TARGET_FREQUENCY: u8 = 7;

/// A unique local identifier for a habit, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HabitId(Uuid);

impl HabitId {
    /// Create a new unique habit ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for HabitId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for HabitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for HabitId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// A tracked habit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Habit {
    /// Local identifier, stable for the life of the record
    pub id: HabitId,
    /// Remote identity, assigned once by the first successful create push
    pub server_id: Option<String>,
    /// Display name
    pub name: String,
    /// Optional longer description
    pub description: Option<String>,
    /// Hex color
    pub color: String,
    /// Icon name
    pub icon: String,
    /// Target days per week (1-7)
    pub target_frequency: u8,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
    /// Last update timestamp (Unix ms)
    pub updated_at: i64,
    /// Soft delete timestamp (Unix ms), `None` while active
    pub deleted_at: Option<i64>,
    /// Sync state relative to the remote store
    pub sync_status: SyncStatus,
}

/// Input for creating a habit
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewHabit {
    pub name: String,
    pub description: Option<String>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub target_frequency: Option<u8>,
}

impl NewHabit {
    /// Create input with only a name; everything else uses defaults
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// Partial update of a habit's user-editable fields
///
/// `description: Some(None)` clears the description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HabitUpdate {
    pub name: Option<String>,
    pub description: Option<Option<String>>,
    pub color: Option<String>,
    pub icon: Option<String>,
    pub target_frequency: Option<u8>,
}

impl HabitUpdate {
    /// True when no field would change
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.description.is_none()
            && self.color.is_none()
            && self.icon.is_none()
            && self.target_frequency.is_none()
    }
}

/// Full field snapshot of a habit captured when a mutation is queued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HabitSnapshot {
    pub server_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub target_frequency: u8,
    pub deleted_at: Option<i64>,
}

impl Habit {
    /// Build a new pending habit from validated input
    pub fn new(input: NewHabit) -> Result<Self> {
        let now = chrono::Utc::now().timestamp_millis();
        let name = validate_name(&input.name)?;
        let target_frequency = validate_frequency(
            input
                .target_frequency
                .unwrap_or(DEFAULT_TARGET_FREQUENCY),
        )?;

        Ok(Self {
            id: HabitId::new(),
            server_id: None,
            name,
            description: input
                .description
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty()),
            color: input
                .color
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_COLOR.to_string()),
            icon: input
                .icon
                .filter(|value| !value.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_ICON.to_string()),
            target_frequency,
            created_at: now,
            updated_at: now,
            deleted_at: None,
            sync_status: SyncStatus::Pending,
        })
    }

    /// Apply a partial update, touching `updated_at` and re-marking pending
    pub fn apply(&mut self, update: &HabitUpdate) -> Result<()> {
        if let Some(name) = &update.name {
            self.name = validate_name(name)?;
        }
        if let Some(description) = &update.description {
            self.description = description
                .as_ref()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty());
        }
        if let Some(color) = &update.color {
            self.color.clone_from(color);
        }
        if let Some(icon) = &update.icon {
            self.icon.clone_from(icon);
        }
        if let Some(frequency) = update.target_frequency {
            self.target_frequency = validate_frequency(frequency)?;
        }
        self.touch();
        Ok(())
    }

    /// Soft delete, re-marking pending
    pub fn soft_delete(&mut self) {
        self.deleted_at = Some(chrono::Utc::now().timestamp_millis());
        self.touch();
    }

    /// Whether the habit has been soft deleted
    pub const fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Snapshot of every synced field
    #[must_use]
    pub fn snapshot(&self) -> HabitSnapshot {
        HabitSnapshot {
            server_id: self.server_id.clone(),
            name: self.name.clone(),
            description: self.description.clone(),
            color: self.color.clone(),
            icon: self.icon.clone(),
            target_frequency: self.target_frequency,
            deleted_at: self.deleted_at,
        }
    }

    fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().timestamp_millis().max(self.updated_at);
        self.sync_status = SyncStatus::Pending;
    }
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::InvalidInput("Habit name cannot be empty".to_string()));
    }
    Ok(name.to_string())
}

fn validate_frequency(frequency: u8) -> Result<u8> {
    if (1..=7).contains(&frequency) {
        Ok(frequency)
    } else {
        Err(Error::InvalidInput(format!(
            "Target frequency must be between 1 and 7 days per week, got {frequency}"
        )))
    }
}
