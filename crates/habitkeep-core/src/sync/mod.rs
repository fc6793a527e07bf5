//! Sync engine.
//!
//! Local writes land in the `SQLite` store together with a mutation queue
//! entry. The [`SyncOrchestrator`] drains that queue to a [`RemoteStore`]
//! (push), then fetches rows changed since the last checkpoint and applies
//! them locally with remote-wins semantics (pull).

mod connectivity;
mod memory;
mod orchestrator;
mod reconcile;
mod remote;
mod supabase;

use serde::Serialize;
use tokio::sync::watch;

pub use connectivity::{spawn_probe, Connectivity, ConnectivityProbe, HttpProbe};
pub use memory::MemoryRemote;
pub use orchestrator::SyncOrchestrator;
pub use remote::{RemoteCompletion, RemoteError, RemoteHabit, RemoteResult, RemoteStore};
pub use supabase::SupabaseRemote;

/// Outcome of one sync cycle
///
/// A cycle never aborts on the first failure; every problem is collected in
/// `errors` and the rest of the work still runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub success: bool,
    pub synced_records: usize,
    pub pushed: usize,
    pub pulled: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    /// A cycle that did nothing because of `reason`
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            errors: vec![reason.into()],
            ..Self::default()
        }
    }

    fn finish(mut self) -> Self {
        self.synced_records = self.pushed + self.pulled;
        self.success = self.errors.is_empty();
        self
    }
}

/// Resolve once `shutdown` flips to true
///
/// Pends forever when the sender is gone, since nothing can stop us then.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    if shutdown.wait_for(|stop| *stop).await.is_err() {
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finish_totals_and_flags_success() {
        let clean = SyncReport {
            pushed: 2,
            pulled: 3,
            ..SyncReport::default()
        }
        .finish();
        assert!(clean.success);
        assert_eq!(clean.synced_records, 5);

        let mut partial = SyncReport {
            pushed: 1,
            ..SyncReport::default()
        };
        partial.errors.push("boom".to_string());
        let partial = partial.finish();
        assert!(!partial.success);
        assert_eq!(partial.synced_records, 1);
    }

    #[test]
    fn failed_report_carries_reason() {
        let report = SyncReport::failed("Offline; sync skipped");
        assert!(!report.success);
        assert_eq!(report.errors, vec!["Offline; sync skipped".to_string()]);
    }
}
