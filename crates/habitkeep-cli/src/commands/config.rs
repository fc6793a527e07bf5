use std::path::{Path, PathBuf};

use habitkeep_core::config::{default_config_path, SyncSettings, UnsyncedDeletePolicy};
use serde::Serialize;

use crate::app::resolve_db_path;
use crate::cli::ConfigCommands;
use crate::commands::common::redact;
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct SettingsView {
    pub config_path: Option<PathBuf>,
    pub db_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_anon_key: Option<&'static str>,
    pub sync_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub connectivity_poll_secs: u64,
    pub unsynced_delete_policy: UnsyncedDeletePolicy,
}

impl SettingsView {
    pub fn new(settings: &SyncSettings, config_path: Option<PathBuf>, db_path: PathBuf) -> Self {
        Self {
            config_path,
            db_path,
            supabase_url: settings.supabase_url.clone(),
            supabase_anon_key: redact(settings.supabase_anon_key.as_deref()),
            sync_interval_secs: settings.sync_interval_secs,
            request_timeout_secs: settings.request_timeout_secs,
            connectivity_poll_secs: settings.connectivity_poll_secs,
            unsynced_delete_policy: settings.unsynced_delete_policy,
        }
    }
}

pub fn run_config(command: ConfigCommands, db_path: Option<PathBuf>) -> Result<(), CliError> {
    match command {
        ConfigCommands::Show { json } => {
            let view = SettingsView::new(
                &SyncSettings::load()?,
                default_config_path(),
                resolve_db_path(db_path)?,
            );
            if json {
                println!("{}", serde_json::to_string_pretty(&view)?);
            } else {
                for line in format_settings_lines(&view) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        ConfigCommands::Init {
            supabase_url,
            supabase_anon_key,
            sync_interval,
            enqueue_unsynced_deletes,
        } => {
            let path = default_config_path()
                .ok_or_else(|| CliError::Config("Failed to resolve config directory".to_string()))?;
            let mut settings = SyncSettings::load_from_path(&path)?;
            apply_init(
                &mut settings,
                supabase_url,
                supabase_anon_key,
                sync_interval,
                enqueue_unsynced_deletes,
            )?;
            save(&settings, &path)?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

/// Merge `config init` flags into the stored settings
pub fn apply_init(
    settings: &mut SyncSettings,
    supabase_url: Option<String>,
    supabase_anon_key: Option<String>,
    sync_interval: Option<u64>,
    enqueue_unsynced_deletes: bool,
) -> Result<(), CliError> {
    if supabase_url.is_some() {
        settings.supabase_url = supabase_url;
    }
    if supabase_anon_key.is_some() {
        settings.supabase_anon_key = supabase_anon_key;
    }
    if let Some(secs) = sync_interval {
        if secs == 0 {
            return Err(CliError::Config(
                "Sync interval must be at least one second".to_string(),
            ));
        }
        settings.sync_interval_secs = secs;
    }
    if enqueue_unsynced_deletes {
        settings.unsynced_delete_policy = UnsyncedDeletePolicy::EnqueueDelete;
    }

    // Reject half-configured Supabase settings before they are written
    settings.supabase()?;
    Ok(())
}

fn save(settings: &SyncSettings, path: &Path) -> Result<(), CliError> {
    settings.save_to_path(path)?;
    tracing::debug!("Saved settings to {}", path.display());
    Ok(())
}

pub fn format_settings_lines(view: &SettingsView) -> Vec<String> {
    let config_path = view
        .config_path
        .as_ref()
        .map_or_else(|| "(none)".to_string(), |path| path.display().to_string());
    vec![
        format!("config file:        {config_path}"),
        format!("database:           {}", view.db_path.display()),
        format!(
            "supabase url:       {}",
            view.supabase_url.as_deref().unwrap_or("(not set)")
        ),
        format!(
            "supabase anon key:  {}",
            view.supabase_anon_key.unwrap_or("(not set)")
        ),
        format!("sync interval:      {}s", view.sync_interval_secs),
        format!("request timeout:    {}s", view.request_timeout_secs),
        format!("connectivity poll:  {}s", view.connectivity_poll_secs),
        format!(
            "unsynced deletes:   {}",
            match view.unsynced_delete_policy {
                UnsyncedDeletePolicy::CancelPendingCreate => "cancel pending create",
                UnsyncedDeletePolicy::EnqueueDelete => "enqueue delete",
            }
        ),
    ]
}
