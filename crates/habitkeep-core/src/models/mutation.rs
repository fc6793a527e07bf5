//! Mutation queue entries and their schema-tagged payloads

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

use super::completion::CompletionSnapshot;
use super::habit::HabitSnapshot;

/// Synced tables
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    Habits,
    HabitCompletions,
}

impl Table {
    /// Every synced table, in pull order (parents before children)
    pub const ALL: [Self; 2] = [Self::Habits, Self::HabitCompletions];

    /// Table name, shared by the local schema and the remote collection
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Habits => "habits",
            Self::HabitCompletions => "habit_completions",
        }
    }

    /// Decode a stored payload for this table
    ///
    /// The payload carries its own schema tag; a tag that belongs to another
    /// table is rejected rather than applied to the wrong collection.
    pub fn decode_payload(self, data: &str) -> Result<MutationPayload> {
        let payload: MutationPayload = serde_json::from_str(data)?;
        if payload.table() == self {
            Ok(payload)
        } else {
            Err(Error::InvalidInput(format!(
                "Payload schema {} does not match table {}",
                payload.table(),
                self
            )))
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Table {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "habits" => Ok(Self::Habits),
            "habit_completions" => Ok(Self::HabitCompletions),
            other => Err(Error::InvalidInput(format!("Unknown table: {other}"))),
        }
    }
}

/// Queued operation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl Operation {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "create" => Ok(Self::Create),
            "update" => Ok(Self::Update),
            "delete" => Ok(Self::Delete),
            other => Err(Error::InvalidInput(format!("Unknown operation: {other}"))),
        }
    }
}

/// Snapshot stored in `sync_queue.data`, tagged with its schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema", rename_all = "snake_case")]
pub enum MutationPayload {
    Habit(HabitSnapshot),
    Completion(CompletionSnapshot),
}

impl MutationPayload {
    /// Table the payload belongs to
    pub const fn table(&self) -> Table {
        match self {
            Self::Habit(_) => Table::Habits,
            Self::Completion(_) => Table::HabitCompletions,
        }
    }

    /// Server identity captured in the snapshot, if the record had one
    pub fn server_id(&self) -> Option<&str> {
        match self {
            Self::Habit(snapshot) => snapshot.server_id.as_deref(),
            Self::Completion(snapshot) => snapshot.server_id.as_deref(),
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// A row of the durable mutation queue
///
/// Table, operation and payload are kept as stored so that one unreadable
/// entry fails on its own instead of failing the whole drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    /// Autoincrement id; defines FIFO order
    pub id: i64,
    pub table_name: String,
    /// Weak reference to the local record
    pub record_id: String,
    pub operation: String,
    pub data: String,
    /// Enqueue timestamp (Unix ms)
    pub created_at: i64,
    pub retry_count: i64,
    pub last_error: Option<String>,
}

/// A queue entry after its table, operation and payload were decoded
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedMutation {
    pub table: Table,
    pub operation: Operation,
    pub payload: MutationPayload,
}

impl QueueEntry {
    /// Decode through the table registry
    pub fn decode(&self) -> Result<DecodedMutation> {
        let table: Table = self.table_name.parse()?;
        let operation: Operation = self.operation.parse()?;
        let payload = table.decode_payload(&self.data)?;
        Ok(DecodedMutation {
            table,
            operation,
            payload,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Habit, HabitCompletion, NewHabit};

    fn entry(table: &str, operation: &str, data: String) -> QueueEntry {
        QueueEntry {
            id: 1,
            table_name: table.to_string(),
            record_id: "r".to_string(),
            operation: operation.to_string(),
            data,
            created_at: 0,
            retry_count: 0,
            last_error: None,
        }
    }

    #[test]
    fn test_payload_carries_schema_tag() {
        let habit = Habit::new(NewHabit::named("Stretch")).unwrap();
        let encoded = MutationPayload::Habit(habit.snapshot()).encode().unwrap();
        assert!(encoded.contains("\"schema\":\"habit\""));
    }

    #[test]
    fn test_decode_through_table() {
        let habit = Habit::new(NewHabit::named("Stretch")).unwrap();
        let data = MutationPayload::Habit(habit.snapshot()).encode().unwrap();

        let decoded = entry("habits", "update", data).decode().unwrap();
        assert_eq!(decoded.table, Table::Habits);
        assert_eq!(decoded.operation, Operation::Update);
        assert_eq!(decoded.payload, MutationPayload::Habit(habit.snapshot()));
    }

    #[test]
    fn test_decode_rejects_mismatched_schema() {
        let completion = HabitCompletion::new(crate::HabitId::new(), 0);
        let data = MutationPayload::Completion(completion.snapshot())
            .encode()
            .unwrap();

        let err = entry("habits", "create", data).decode().unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn test_decode_unknown_table_and_operation() {
        assert!(entry("habit_groups", "create", "{}".to_string())
            .decode()
            .is_err());
        assert!(entry("habits", "upsert", "{}".to_string()).decode().is_err());
    }
}
