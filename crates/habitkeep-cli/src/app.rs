//! Composition root: settings, local store, session and services.

use std::env;
use std::path::PathBuf;

use habitkeep_core::auth::{AuthState, SupabaseAuthClient};
use habitkeep_core::config::{default_database_path, SupabaseEndpoint, SyncSettings};
use habitkeep_core::services::{DatabaseService, HabitService};
use habitkeep_core::sync::{Connectivity, SupabaseRemote, SyncOrchestrator};

use crate::auth::KeyringSessionStore;
use crate::error::CliError;

const DB_PATH_ENV: &str = "HABITKEEP_DB_PATH";

pub struct App {
    pub settings: SyncSettings,
    pub db: DatabaseService,
    pub auth: AuthState,
    pub habits: HabitService,
    endpoint: Option<SupabaseEndpoint>,
}

impl App {
    /// Open the local store and restore any saved session
    pub async fn open(db_path: Option<PathBuf>) -> Result<Self, CliError> {
        let settings = SyncSettings::load()?;
        let db = DatabaseService::open_path(resolve_db_path(db_path)?)?;
        let app = Self::from_parts(settings, db, AuthState::new())?;

        if app.endpoint.is_some() {
            if let Err(error) = app.auth_client()?.restore_into(&app.auth).await {
                tracing::warn!("Failed to restore saved session: {error}");
            }
        }
        Ok(app)
    }

    pub fn from_parts(
        settings: SyncSettings,
        db: DatabaseService,
        auth: AuthState,
    ) -> Result<Self, CliError> {
        let endpoint = settings.supabase()?;
        let habits = HabitService::new(db.clone(), auth.clone())
            .with_delete_policy(settings.unsynced_delete_policy);
        Ok(Self {
            settings,
            db,
            auth,
            habits,
            endpoint,
        })
    }

    pub fn endpoint(&self) -> Result<&SupabaseEndpoint, CliError> {
        self.endpoint.as_ref().ok_or(CliError::SyncNotConfigured)
    }

    pub fn auth_client(&self) -> Result<SupabaseAuthClient<KeyringSessionStore>, CliError> {
        let endpoint = self.endpoint()?;
        Ok(SupabaseAuthClient::new(
            endpoint,
            KeyringSessionStore::new(&endpoint.url),
        )?)
    }

    pub fn orchestrator(
        &self,
        connectivity: Connectivity,
    ) -> Result<SyncOrchestrator<SupabaseRemote>, CliError> {
        let remote = SupabaseRemote::new(self.endpoint()?, self.auth.clone())?;
        Ok(SyncOrchestrator::new(
            self.db.clone(),
            remote,
            self.auth.clone(),
            connectivity,
            &self.settings,
        ))
    }
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> Result<PathBuf, CliError> {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .or_else(default_database_path)
        .ok_or_else(|| CliError::Config("Failed to resolve data directory".to_string()))
}
