//! Database layer for habitkeep

mod connection;
mod migrations;
mod queue_repository;
mod repository;
pub mod schema;
mod sync_state_repository;

pub use connection::Database;
pub use queue_repository::{MutationQueue, SqliteMutationQueue};
pub use repository::{HabitRepository, SqliteHabitRepository};
pub use sync_state_repository::{SqliteSyncStateRepository, SyncStateRepository};
