//! Remote store abstraction and its row shapes.
//!
//! The remote is a set of collections named after the local tables. Rows travel
//! as JSON objects; [`RemoteHabit`] and [`RemoteCompletion`] are the typed view
//! the reconciler works with.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::Table;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote API error: {message}")]
    Api { status: u16, message: String },
    #[error("Remote request timed out after {0:?}")]
    Timeout(Duration),
    #[error("Invalid remote payload: {0}")]
    InvalidPayload(String),
    #[error("Remote record not found: {0}")]
    NotFound(String),
    #[error("Request cancelled by shutdown")]
    Cancelled,
}

impl From<serde_json::Error> for RemoteError {
    fn from(error: serde_json::Error) -> Self {
        Self::InvalidPayload(error.to_string())
    }
}

impl From<RemoteError> for crate::Error {
    fn from(error: RemoteError) -> Self {
        Self::RemoteRequestFailed(error.to_string())
    }
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// Collection-oriented remote store
///
/// Implementations own their transport and credentials; callers only see
/// rows. Each call resolves independently so one failure never poisons the
/// next.
pub trait RemoteStore: Send + Sync + 'static {
    /// Insert a row and return it as stored, including the assigned `id`
    fn insert(
        &self,
        collection: Table,
        row: Value,
    ) -> impl Future<Output = RemoteResult<Value>> + Send;

    /// Apply a partial update to the row with `id` and return it as stored
    fn update(
        &self,
        collection: Table,
        id: &str,
        patch: Value,
    ) -> impl Future<Output = RemoteResult<Value>> + Send;

    /// Live rows with `updated_at >= since`, every live row when `since` is
    /// `None`
    fn select_changed(
        &self,
        collection: Table,
        since: Option<DateTime<Utc>>,
    ) -> impl Future<Output = RemoteResult<Vec<Value>>> + Send;
}

/// A row of the remote `habits` collection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteHabit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub color: String,
    pub icon: String,
    pub target_frequency: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// A row of the remote `habit_completions` collection
///
/// `habit_id` is the owning habit's remote id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCompletion {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub habit_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub completed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Remote id of a stored row
pub fn row_id(row: &Value) -> RemoteResult<String> {
    row.get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| RemoteError::InvalidPayload("row has no id".to_string()))
}

/// `updated_at` of a stored row as Unix ms
pub fn row_updated_at(row: &Value) -> Option<i64> {
    row.get("updated_at")
        .and_then(Value::as_str)
        .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
        .map(|at| at.timestamp_millis())
}
