//! Data models for habitkeep

mod completion;
mod habit;
mod mutation;
mod status;

pub use completion::{CompletionId, CompletionSnapshot, HabitCompletion};
pub use habit::{Habit, HabitId, HabitSnapshot, HabitUpdate, NewHabit};
pub use mutation::{DecodedMutation, MutationPayload, Operation, QueueEntry, Table};
pub use status::SyncStatus;
