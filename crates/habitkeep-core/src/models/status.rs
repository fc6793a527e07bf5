//! Per-record sync status

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sync state of a local record relative to the remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Local changes not yet propagated
    #[default]
    Pending,
    /// Matches the remote store as of the last push/pull
    Synced,
    /// Last push attempt failed; the queue entry is retried next cycle
    Error,
}

impl SyncStatus {
    /// Column value stored in `sync_status`
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Synced => "synced",
            Self::Error => "error",
        }
    }

    /// Value stored in the `is_synced` column
    pub const fn is_synced(self) -> bool {
        matches!(self, Self::Synced)
    }

    /// Whether the record still needs to reach the remote store
    pub const fn needs_sync(self) -> bool {
        !self.is_synced()
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "synced" => Ok(Self::Synced),
            "error" => Ok(Self::Error),
            other => Err(crate::Error::InvalidInput(format!(
                "Unknown sync status: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse() {
        for status in [SyncStatus::Pending, SyncStatus::Synced, SyncStatus::Error] {
            assert_eq!(status.as_str().parse::<SyncStatus>().unwrap(), status);
        }
        assert!("done".parse::<SyncStatus>().is_err());
    }

    #[test]
    fn test_needs_sync() {
        assert!(SyncStatus::Pending.needs_sync());
        assert!(SyncStatus::Error.needs_sync());
        assert!(!SyncStatus::Synced.needs_sync());
    }
}
