//! Shared sync state published to UI consumers.

/// Coarse state of the sync orchestrator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    Offline,
    Idle,
    Syncing,
    Synced,
    Error,
}

impl SyncState {
    /// Short label for status lines.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Offline => "offline",
            Self::Idle => "idle",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }
}
