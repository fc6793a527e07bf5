//! habitkeep-core - Core library for habitkeep
//!
//! This crate contains the habit models, the local `SQLite` store with its
//! mutation queue, the sync engine that reconciles with a remote store, and
//! the streak/completion-rate analytics used by every habitkeep interface.

pub mod analytics;
pub mod auth;
pub mod changes;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod state;
pub mod sync;
pub mod util;

pub use error::{Error, Result};
pub use models::{CompletionId, Habit, HabitCompletion, HabitId, SyncStatus};
