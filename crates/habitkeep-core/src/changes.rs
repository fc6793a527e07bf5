//! Change notification for consumers of the local store.
//!
//! Every committed write bumps a monotonic change token and broadcasts a
//! [`Change`]. Consumers either poll [`ChangeFeed::token`] and re-query when it
//! moved, or hold a [`ChangeFeed::subscribe`] receiver.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast;

use crate::models::Table;

const DEFAULT_CAPACITY: usize = 256;

/// What happened to a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Created,
    Updated,
    Deleted,
    /// Sync metadata changed (server id, sync status)
    Synced,
}

/// One committed change to a local record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    /// Token value after this change
    pub token: u64,
    pub table: Table,
    pub record_id: String,
    pub kind: ChangeKind,
}

/// Shared change publisher
#[derive(Clone)]
pub struct ChangeFeed {
    inner: Arc<FeedInner>,
}

struct FeedInner {
    token: AtomicU64,
    sender: broadcast::Sender<Change>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Create a feed whose subscribers buffer up to `capacity` changes
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            inner: Arc::new(FeedInner {
                token: AtomicU64::new(0),
                sender,
            }),
        }
    }

    /// Current change token; strictly increases with every published change
    pub fn token(&self) -> u64 {
        self.inner.token.load(Ordering::SeqCst)
    }

    /// Subscribe to changes published after this call
    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.inner.sender.subscribe()
    }

    /// Publish a committed change and return the new token
    pub fn publish(&self, table: Table, record_id: impl Into<String>, kind: ChangeKind) -> u64 {
        let token = self.inner.token.fetch_add(1, Ordering::SeqCst) + 1;
        // No subscribers is fine; pollers still see the token move
        let _ = self.inner.sender.send(Change {
            token,
            table,
            record_id: record_id.into(),
            kind,
        });
        token
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeFeed")
            .field("token", &self.token())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_monotonic() {
        let feed = ChangeFeed::new();
        assert_eq!(feed.token(), 0);
        let first = feed.publish(Table::Habits, "a", ChangeKind::Created);
        let second = feed.publish(Table::Habits, "a", ChangeKind::Updated);
        assert!(second > first);
        assert_eq!(feed.token(), second);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_subscriber_receives_changes() {
        let feed = ChangeFeed::new();
        let mut receiver = feed.subscribe();

        feed.publish(Table::HabitCompletions, "c1", ChangeKind::Deleted);

        let change = receiver.recv().await.unwrap();
        assert_eq!(change.table, Table::HabitCompletions);
        assert_eq!(change.record_id, "c1");
        assert_eq!(change.kind, ChangeKind::Deleted);
        assert_eq!(change.token, 1);
    }
}
