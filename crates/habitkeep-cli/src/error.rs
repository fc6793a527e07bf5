use std::io;

use habitkeep_core::auth::AuthError;
use habitkeep_core::sync::RemoteError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Core(#[from] habitkeep_core::Error),
    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
    #[error("No habit name provided")]
    EmptyName,
    #[error("Nothing to change; pass at least one field")]
    EmptyUpdate,
    #[error("Configuration error: {0}")]
    Config(String),
    #[error(
        "Sync is not configured. Run `habitkeep config init --supabase-url <URL> --supabase-anon-key <KEY>` or set HABITKEEP_SUPABASE_URL and HABITKEEP_SUPABASE_ANON_KEY."
    )]
    SyncNotConfigured,
    #[error("Sync finished with errors:\n{0}")]
    SyncFailed(String),
}
