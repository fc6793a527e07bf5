//! In-process remote store.
//!
//! Behaves like the PostgREST backend (server-assigned ids and timestamps,
//! `updated_at >= since` selection) and can be told to fail or stall, which
//! makes it the remote for tests and offline demos.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::models::Table;

use super::remote::{row_id, RemoteError, RemoteResult, RemoteStore};

#[derive(Default)]
struct MemoryState {
    rows: HashMap<Table, Vec<Map<String, Value>>>,
    failing_writes: bool,
    failing_reads: HashSet<Table>,
    latency: Option<Duration>,
    calls: usize,
}

/// Shared in-memory remote; clones see the same rows
#[derive(Clone, Default)]
pub struct MemoryRemote {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make inserts and updates fail with HTTP 503
    pub fn fail_writes(&self, failing: bool) {
        self.lock().failing_writes = failing;
    }

    /// Make selects of one collection fail with HTTP 503
    pub fn fail_reads(&self, collection: Table, failing: bool) {
        let mut state = self.lock();
        if failing {
            state.failing_reads.insert(collection);
        } else {
            state.failing_reads.remove(&collection);
        }
    }

    /// Delay every call, as a slow network would
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Number of calls served so far
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    /// Every row of a collection, soft-deleted ones included
    pub fn rows(&self, collection: Table) -> Vec<Value> {
        self.lock()
            .rows
            .get(&collection)
            .map(|rows| rows.iter().cloned().map(Value::Object).collect())
            .unwrap_or_default()
    }

    /// One row by id
    pub fn row(&self, collection: Table, id: &str) -> Option<Value> {
        self.lock()
            .rows
            .get(&collection)
            .and_then(|rows| {
                rows.iter()
                    .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
            })
            .cloned()
            .map(Value::Object)
    }

    /// Store a row as another device would, keeping a caller-provided `id`
    pub fn seed(&self, collection: Table, row: Value) -> RemoteResult<Value> {
        self.store_row(collection, row)
    }

    fn store_row(&self, collection: Table, row: Value) -> RemoteResult<Value> {
        let Value::Object(mut row) = row else {
            return Err(RemoteError::InvalidPayload(
                "row must be a JSON object".to_string(),
            ));
        };

        let now = timestamp_now();
        if !row.get("id").is_some_and(Value::is_string) {
            row.insert("id".to_string(), Value::String(Uuid::now_v7().to_string()));
        }
        if !row.get("created_at").is_some_and(Value::is_string) {
            row.insert("created_at".to_string(), Value::String(now.clone()));
        }
        row.insert("updated_at".to_string(), Value::String(now));
        row.entry("deleted_at").or_insert(Value::Null);

        let mut state = self.lock();
        let rows = state.rows.entry(collection).or_default();
        let id = row_id(&Value::Object(row.clone()))?;
        if rows
            .iter()
            .any(|existing| existing.get("id").and_then(Value::as_str) == Some(id.as_str()))
        {
            return Err(RemoteError::Api {
                status: 409,
                message: format!("duplicate key {id} (409)"),
            });
        }
        rows.push(row.clone());
        Ok(Value::Object(row))
    }

    async fn begin_call(&self) {
        let latency = {
            let mut state = self.lock();
            state.calls += 1;
            state.latency
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writes(&self) -> RemoteResult<()> {
        if self.lock().failing_writes {
            return Err(unavailable());
        }
        Ok(())
    }
}

impl RemoteStore for MemoryRemote {
    async fn insert(&self, collection: Table, row: Value) -> RemoteResult<Value> {
        self.begin_call().await;
        self.check_writes()?;
        self.store_row(collection, row)
    }

    async fn update(&self, collection: Table, id: &str, patch: Value) -> RemoteResult<Value> {
        self.begin_call().await;
        self.check_writes()?;

        let Value::Object(patch) = patch else {
            return Err(RemoteError::InvalidPayload(
                "patch must be a JSON object".to_string(),
            ));
        };

        let mut state = self.lock();
        let row = state
            .rows
            .get_mut(&collection)
            .and_then(|rows| {
                rows.iter_mut()
                    .find(|row| row.get("id").and_then(Value::as_str) == Some(id))
            })
            .ok_or_else(|| RemoteError::NotFound(format!("{collection}/{id}")))?;

        for (key, value) in patch {
            if key != "id" && key != "user_id" && key != "created_at" {
                row.insert(key, value);
            }
        }
        row.insert("updated_at".to_string(), Value::String(timestamp_now()));
        Ok(Value::Object(row.clone()))
    }

    async fn select_changed(
        &self,
        collection: Table,
        since: Option<DateTime<Utc>>,
    ) -> RemoteResult<Vec<Value>> {
        self.begin_call().await;

        let state = self.lock();
        if state.failing_reads.contains(&collection) {
            return Err(unavailable());
        }

        let mut rows = state
            .rows
            .get(&collection)
            .into_iter()
            .flatten()
            .filter(|row| row.get("deleted_at").map_or(true, Value::is_null))
            .filter(|row| match since {
                Some(since) => updated_at(row).is_some_and(|at| at >= since),
                None => true,
            })
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by_key(updated_at);
        Ok(rows.into_iter().map(Value::Object).collect())
    }
}

fn updated_at(row: &Map<String, Value>) -> Option<DateTime<Utc>> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.with_timezone(&Utc))
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn unavailable() -> RemoteError {
    RemoteError::Api {
        status: 503,
        message: "Service unavailable (503)".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(flavor = "multi_thread")]
    async fn insert_assigns_identity_and_timestamps() {
        let remote = MemoryRemote::new();
        let stored = remote
            .insert(Table::Habits, json!({ "name": "Read" }))
            .await
            .unwrap();

        assert!(stored["id"].is_string());
        assert!(stored["created_at"].is_string());
        assert_eq!(stored["deleted_at"], Value::Null);
        assert_eq!(remote.rows(Table::Habits).len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn update_merges_patch_and_bumps_updated_at() {
        let remote = MemoryRemote::new();
        let stored = remote
            .insert(Table::Habits, json!({ "name": "Read", "color": "#000000" }))
            .await
            .unwrap();
        let id = stored["id"].as_str().unwrap();

        let updated = remote
            .update(Table::Habits, id, json!({ "name": "Read more" }))
            .await
            .unwrap();
        assert_eq!(updated["name"], "Read more");
        assert_eq!(updated["color"], "#000000");
        assert!(updated["updated_at"].as_str() >= stored["updated_at"].as_str());

        let missing = remote
            .update(Table::Habits, "missing", json!({ "name": "x" }))
            .await;
        assert!(matches!(missing, Err(RemoteError::NotFound(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn select_skips_deleted_and_older_rows() {
        let remote = MemoryRemote::new();
        let old = remote
            .insert(Table::Habits, json!({ "name": "Old" }))
            .await
            .unwrap();
        let gone = remote
            .insert(Table::Habits, json!({ "name": "Gone" }))
            .await
            .unwrap();
        remote
            .update(
                Table::Habits,
                gone["id"].as_str().unwrap(),
                json!({ "deleted_at": "2024-01-01T00:00:00Z" }),
            )
            .await
            .unwrap();

        let all = remote.select_changed(Table::Habits, None).await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0]["id"], old["id"]);

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(remote
            .select_changed(Table::Habits, Some(future))
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn failure_switches() {
        let remote = MemoryRemote::new();
        remote.fail_writes(true);
        assert!(remote
            .insert(Table::Habits, json!({ "name": "Read" }))
            .await
            .is_err());

        remote.fail_reads(Table::HabitCompletions, true);
        assert!(remote
            .select_changed(Table::HabitCompletions, None)
            .await
            .is_err());
        assert!(remote.select_changed(Table::Habits, None).await.is_ok());
        assert_eq!(remote.calls(), 3);
    }

    #[test]
    fn seed_keeps_caller_id() {
        let remote = MemoryRemote::new();
        remote
            .seed(Table::Habits, json!({ "id": "h-1", "name": "Seeded" }))
            .unwrap();
        assert!(remote.row(Table::Habits, "h-1").is_some());
        assert!(remote
            .seed(Table::Habits, json!({ "id": "h-1", "name": "Again" }))
            .is_err());
    }
}
