//! Async services shared by every habitkeep client.

mod database;
mod habits;

pub use database::{DatabaseService, PendingChanges};
pub use habits::HabitService;
