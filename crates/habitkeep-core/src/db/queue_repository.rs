//! Durable mutation queue

use crate::error::Result;
use crate::models::{MutationPayload, Operation, QueueEntry, Table};
use rusqlite::{params, Connection, OptionalExtension};

use super::schema::{queue_entry_from_row, SYNC_QUEUE};

/// Ordered log of local writes waiting to reach the remote store
pub trait MutationQueue {
    /// Append an entry at the tail; earlier entries for the record are untouched
    fn enqueue(
        &self,
        table: Table,
        record_id: &str,
        operation: Operation,
        payload: &MutationPayload,
    ) -> Result<i64>;

    /// Every entry in FIFO order
    fn drain(&self) -> Result<Vec<QueueEntry>>;

    /// Permanently remove a pushed entry
    fn remove(&self, entry_id: i64) -> Result<()>;

    /// Keep a failed entry, bump its retry count and record the error
    ///
    /// Returns the new retry count.
    fn record_failure(&self, entry_id: i64, error: &str) -> Result<i64>;

    /// Remove every entry for a record; returns how many were removed
    fn remove_for_record(&self, table: Table, record_id: &str) -> Result<usize>;

    /// Whether any entry for the record is still queued
    fn has_entries_for(&self, table: Table, record_id: &str) -> Result<bool>;

    /// Whether a `create` for the record is still queued
    fn has_pending_create(&self, table: Table, record_id: &str) -> Result<bool>;

    /// Number of queued entries
    fn pending_count(&self) -> Result<usize>;
}

/// `SQLite` implementation of `MutationQueue`
pub struct SqliteMutationQueue<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteMutationQueue<'a> {
    /// Create a new queue over the given connection
    pub const fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }
}

impl MutationQueue for SqliteMutationQueue<'_> {
    fn enqueue(
        &self,
        table: Table,
        record_id: &str,
        operation: Operation,
        payload: &MutationPayload,
    ) -> Result<i64> {
        let data = payload.encode()?;
        let now = chrono::Utc::now().timestamp_millis();
        self.conn.execute(
            "INSERT INTO sync_queue (table_name, record_id, operation, data, created_at, retry_count)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![table.as_str(), record_id, operation.as_str(), data, now],
        )?;
        let id = self.conn.last_insert_rowid();
        tracing::debug!("Queued {operation} for {table}:{record_id} as entry {id}");
        Ok(id)
    }

    fn drain(&self) -> Result<Vec<QueueEntry>> {
        let sql = format!(
            "SELECT {} FROM sync_queue ORDER BY id ASC",
            SYNC_QUEUE.select_columns()
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let entries = stmt
            .query_map([], queue_entry_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    fn remove(&self, entry_id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM sync_queue WHERE id = ?1", params![entry_id])?;
        Ok(())
    }

    fn record_failure(&self, entry_id: i64, error: &str) -> Result<i64> {
        let retry_count = self
            .conn
            .query_row(
                "UPDATE sync_queue
                 SET retry_count = retry_count + 1, last_error = ?1
                 WHERE id = ?2
                 RETURNING retry_count",
                params![error, entry_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(retry_count.unwrap_or(0))
    }

    fn remove_for_record(&self, table: Table, record_id: &str) -> Result<usize> {
        let removed = self.conn.execute(
            "DELETE FROM sync_queue WHERE table_name = ?1 AND record_id = ?2",
            params![table.as_str(), record_id],
        )?;
        Ok(removed)
    }

    fn has_entries_for(&self, table: Table, record_id: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM sync_queue WHERE table_name = ?1 AND record_id = ?2)",
            params![table.as_str(), record_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn has_pending_create(&self, table: Table, record_id: &str) -> Result<bool> {
        let exists = self.conn.query_row(
            "SELECT EXISTS(
                SELECT 1 FROM sync_queue
                WHERE table_name = ?1 AND record_id = ?2 AND operation = 'create'
            )",
            params![table.as_str(), record_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    fn pending_count(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM sync_queue", [], |row| row.get(0))?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::{Habit, NewHabit};

    fn payload() -> MutationPayload {
        MutationPayload::Habit(Habit::new(NewHabit::named("Floss")).unwrap().snapshot())
    }

    #[test]
    fn test_drain_is_fifo_without_collapsing() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteMutationQueue::new(db.connection());

        queue
            .enqueue(Table::Habits, "a", Operation::Create, &payload())
            .unwrap();
        queue
            .enqueue(Table::Habits, "b", Operation::Create, &payload())
            .unwrap();
        queue
            .enqueue(Table::Habits, "a", Operation::Update, &payload())
            .unwrap();
        queue
            .enqueue(Table::Habits, "a", Operation::Update, &payload())
            .unwrap();

        let entries = queue.drain().unwrap();
        let order = entries
            .iter()
            .map(|entry| (entry.record_id.as_str(), entry.operation.as_str()))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![
                ("a", "create"),
                ("b", "create"),
                ("a", "update"),
                ("a", "update")
            ]
        );
        assert_eq!(queue.pending_count().unwrap(), 4);
    }

    #[test]
    fn test_record_failure_keeps_entry() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteMutationQueue::new(db.connection());

        let id = queue
            .enqueue(Table::Habits, "a", Operation::Create, &payload())
            .unwrap();

        assert_eq!(queue.record_failure(id, "timeout").unwrap(), 1);
        assert_eq!(queue.record_failure(id, "HTTP 500").unwrap(), 2);

        let entries = queue.drain().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].retry_count, 2);
        assert_eq!(entries[0].last_error.as_deref(), Some("HTTP 500"));
    }

    #[test]
    fn test_remove_and_record_lookups() {
        let db = Database::open_in_memory().unwrap();
        let queue = SqliteMutationQueue::new(db.connection());

        let create = queue
            .enqueue(Table::Habits, "a", Operation::Create, &payload())
            .unwrap();
        queue
            .enqueue(Table::Habits, "a", Operation::Update, &payload())
            .unwrap();

        assert!(queue.has_pending_create(Table::Habits, "a").unwrap());
        queue.remove(create).unwrap();
        assert!(!queue.has_pending_create(Table::Habits, "a").unwrap());
        assert!(queue.has_entries_for(Table::Habits, "a").unwrap());

        assert_eq!(queue.remove_for_record(Table::Habits, "a").unwrap(), 1);
        assert!(!queue.has_entries_for(Table::Habits, "a").unwrap());
        assert_eq!(queue.pending_count().unwrap(), 0);
    }
}
