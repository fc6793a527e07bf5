//! Shared database service wrapper used across clients.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::{Connection, Transaction};
use tokio::sync::Mutex;

use crate::changes::{ChangeFeed, ChangeKind};
use crate::db::{Database, MutationQueue, SqliteMutationQueue};
use crate::models::{QueueEntry, Table};
use crate::Result;

/// Changes made inside a write, published once the transaction commits
#[derive(Debug, Default)]
pub struct PendingChanges {
    changes: Vec<(Table, String, ChangeKind)>,
}

impl PendingChanges {
    pub fn record(&mut self, table: Table, record_id: impl Into<String>, kind: ChangeKind) {
        self.changes.push((table, record_id.into(), kind));
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Thread-safe handle to the local store.
///
/// Every write runs in one `SQLite` transaction and, once committed, bumps the
/// shared [`ChangeFeed`]. The lock is only held for the duration of a single
/// closure, never across a remote call.
#[derive(Clone)]
pub struct DatabaseService {
    db: Arc<Mutex<Database>>,
    db_path: Option<PathBuf>,
    changes: ChangeFeed,
}

impl DatabaseService {
    /// Open the store at the given filesystem path.
    ///
    /// A file that is not a database is moved aside and the store recreated.
    pub fn open_path(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db = match Database::open(&db_path) {
            Ok(db) => db,
            Err(error) if Self::is_corrupted_db_error(&error) => {
                tracing::warn!(
                    "Local store at {} is unreadable ({error}); starting fresh",
                    db_path.display()
                );
                Self::quarantine_corrupted_db_files(&db_path)?;
                Database::open(&db_path)?
            }
            Err(error) => return Err(error),
        };

        tracing::debug!("Using local store at {}", db_path.display());
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
            db_path: Some(db_path),
            changes: ChangeFeed::new(),
        })
    }

    /// Open an in-memory store (primarily for tests).
    pub fn open_in_memory() -> Result<Self> {
        Ok(Self {
            db: Arc::new(Mutex::new(Database::open_in_memory()?)),
            db_path: None,
            changes: ChangeFeed::new(),
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Change feed bumped by every committed write
    pub const fn changes(&self) -> &ChangeFeed {
        &self.changes
    }

    /// Run a read-only closure against the connection
    pub async fn read<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let db = self.db.lock().await;
        f(db.connection())
    }

    /// Run a closure inside one transaction, commit, then publish its changes
    ///
    /// An error from the closure rolls every write back and publishes nothing.
    pub async fn write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>, &mut PendingChanges) -> Result<T>,
    ) -> Result<T> {
        let mut pending = PendingChanges::default();
        let value = {
            let mut db = self.db.lock().await;
            let tx = db.transaction()?;
            let value = f(&tx, &mut pending)?;
            tx.commit()?;
            value
        };

        for (table, record_id, kind) in pending.changes {
            self.changes.publish(table, record_id, kind);
        }
        Ok(value)
    }

    /// Queued mutations in push order
    pub async fn list_queue(&self) -> Result<Vec<QueueEntry>> {
        self.read(|conn| SqliteMutationQueue::new(conn).drain())
            .await
    }

    pub async fn pending_count(&self) -> Result<usize> {
        self.read(|conn| SqliteMutationQueue::new(conn).pending_count())
            .await
    }

    fn is_corrupted_db_error(error: &crate::Error) -> bool {
        let message = error.to_string().to_ascii_lowercase();
        message.contains("file is not a database") || message.contains("malformed")
    }

    fn quarantine_corrupted_db_files(db_path: &Path) -> Result<()> {
        if db_path.exists() {
            let timestamp = chrono::Utc::now().timestamp_millis();
            let file_name = db_path
                .file_name()
                .map_or_else(|| "habitkeep.db".into(), |name| name.to_string_lossy());
            let backup_path = db_path.with_file_name(format!("{file_name}.corrupt-{timestamp}"));

            std::fs::rename(db_path, &backup_path)?;
            tracing::warn!(
                "Moved corrupted local store from {} to {}",
                db_path.display(),
                backup_path.display()
            );
        }

        let Some(parent) = db_path.parent() else {
            return Ok(());
        };
        let Some(base_name) = db_path.file_name().and_then(|name| name.to_str()) else {
            return Ok(());
        };
        // WAL and shared-memory sidecars of the moved file
        for suffix in ["-wal", "-shm", "-journal"] {
            let sidecar = parent.join(format!("{base_name}{suffix}"));
            if sidecar.exists() {
                std::fs::remove_file(&sidecar)?;
                tracing::warn!("Removed stale sidecar {}", sidecar.display());
            }
        }

        Ok(())
    }
}
