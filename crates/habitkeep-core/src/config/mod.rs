//! Client configuration.
//!
//! Settings come from an optional JSON file (`habitkeep/config.json` in the
//! platform config dir) with environment variables layered on top. Only
//! public endpoints and keys belong here; sessions live in secure storage.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::util::{is_http_url, normalize_text_option};

const CONFIG_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "habitkeep";

const ENV_SUPABASE_URL: &str = "HABITKEEP_SUPABASE_URL";
const ENV_SUPABASE_ANON_KEY: &str = "HABITKEEP_SUPABASE_ANON_KEY";
const ENV_SYNC_INTERVAL_SECS: &str = "HABITKEEP_SYNC_INTERVAL_SECS";
const ENV_REQUEST_TIMEOUT_SECS: &str = "HABITKEEP_REQUEST_TIMEOUT_SECS";

const DEFAULT_SYNC_INTERVAL_SECS: u64 = 30;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 15;
const DEFAULT_CONNECTIVITY_POLL_SECS: u64 = 10;

/// What deleting a record that never reached the remote store does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnsyncedDeletePolicy {
    /// Drop every queued entry for the record and enqueue nothing
    #[default]
    CancelPendingCreate,
    /// Enqueue the delete anyway; it only succeeds once the create was pushed
    EnqueueDelete,
}

/// Supabase project endpoint and public key
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupabaseEndpoint {
    pub url: String,
    pub anon_key: String,
}

/// Sync and remote settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct SyncSettings {
    #[serde(default)]
    pub supabase_url: Option<String>,
    #[serde(default)]
    pub supabase_anon_key: Option<String>,
    #[serde(default = "default_sync_interval_secs")]
    pub sync_interval_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_connectivity_poll_secs")]
    pub connectivity_poll_secs: u64,
    #[serde(default)]
    pub unsynced_delete_policy: UnsyncedDeletePolicy,
}

const fn default_sync_interval_secs() -> u64 {
    DEFAULT_SYNC_INTERVAL_SECS
}

const fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

const fn default_connectivity_poll_secs() -> u64 {
    DEFAULT_CONNECTIVITY_POLL_SECS
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            supabase_url: None,
            supabase_anon_key: None,
            sync_interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            connectivity_poll_secs: DEFAULT_CONNECTIVITY_POLL_SECS,
            unsynced_delete_policy: UnsyncedDeletePolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Load from the default config path plus process environment
    pub fn load() -> Result<Self> {
        let mut settings = match default_config_path() {
            Some(path) => Self::load_from_path(&path)?,
            None => Self::default(),
        };
        settings.apply_env(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    /// Load from a JSON file; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)?;
        let settings = serde_json::from_str::<Self>(&raw).map_err(|error| {
            Error::InvalidInput(format!(
                "Failed to parse config at {}: {error}",
                path.display()
            ))
        })?;
        Ok(settings)
    }

    /// Write to a JSON file, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Override fields from environment-style lookups
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = normalize_text_option(lookup(ENV_SUPABASE_URL)) {
            self.supabase_url = Some(url);
        }
        if let Some(key) = normalize_text_option(lookup(ENV_SUPABASE_ANON_KEY)) {
            self.supabase_anon_key = Some(key);
        }
        if let Some(secs) = parse_secs(lookup(ENV_SYNC_INTERVAL_SECS), ENV_SYNC_INTERVAL_SECS)? {
            self.sync_interval_secs = secs;
        }
        if let Some(secs) = parse_secs(lookup(ENV_REQUEST_TIMEOUT_SECS), ENV_REQUEST_TIMEOUT_SECS)?
        {
            self.request_timeout_secs = secs;
        }
        Ok(())
    }

    /// Supabase endpoint, `None` when sync is not configured
    ///
    /// A URL without a key (or the reverse) is an error rather than silently
    /// running offline.
    pub fn supabase(&self) -> Result<Option<SupabaseEndpoint>> {
        let url = normalize_text_option(self.supabase_url.clone());
        let anon_key = normalize_text_option(self.supabase_anon_key.clone());

        match (url, anon_key) {
            (None, None) => Ok(None),
            (Some(url), Some(anon_key)) => {
                if !is_http_url(&url) {
                    return Err(Error::InvalidInput(
                        "Supabase URL must include http:// or https://".to_string(),
                    ));
                }
                Ok(Some(SupabaseEndpoint {
                    url: url.trim_end_matches('/').to_string(),
                    anon_key,
                }))
            }
            _ => Err(Error::InvalidInput(
                "Supabase sync needs both a URL and an anon key".to_string(),
            )),
        }
    }

    pub const fn sync_interval(&self) -> Duration {
        Duration::from_secs(nonzero(self.sync_interval_secs))
    }

    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(nonzero(self.request_timeout_secs))
    }

    pub const fn connectivity_poll_interval(&self) -> Duration {
        Duration::from_secs(nonzero(self.connectivity_poll_secs))
    }
}

/// Default config file location
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Default local database location
pub fn default_database_path() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join(APP_DIR_NAME).join("habitkeep.db"))
}

const fn nonzero(secs: u64) -> u64 {
    if secs == 0 {
        1
    } else {
        secs
    }
}

fn parse_secs(value: Option<String>, key: &str) -> Result<Option<u64>> {
    let Some(value) = normalize_text_option(value) else {
        return Ok(None);
    };
    value
        .parse::<u64>()
        .map(Some)
        .map_err(|_| Error::InvalidInput(format!("{key} must be a whole number of seconds")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map = pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect::<HashMap<_, _>>();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_sync_cadence() {
        let settings = SyncSettings::default();
        assert_eq!(settings.sync_interval(), Duration::from_secs(30));
        assert_eq!(settings.request_timeout(), Duration::from_secs(15));
        assert_eq!(
            settings.unsynced_delete_policy,
            UnsyncedDeletePolicy::CancelPendingCreate
        );
        assert!(settings.supabase().unwrap().is_none());
    }

    #[test]
    fn env_overrides_file_values() {
        let mut settings = SyncSettings {
            supabase_url: Some("https://file.supabase.co".to_string()),
            supabase_anon_key: Some("file-key".to_string()),
            ..SyncSettings::default()
        };
        settings
            .apply_env(lookup(&[
                (ENV_SUPABASE_URL, " https://env.supabase.co/ "),
                (ENV_SYNC_INTERVAL_SECS, "5"),
            ]))
            .unwrap();

        let endpoint = settings.supabase().unwrap().unwrap();
        assert_eq!(endpoint.url, "https://env.supabase.co");
        assert_eq!(endpoint.anon_key, "file-key");
        assert_eq!(settings.sync_interval(), Duration::from_secs(5));
    }

    #[test]
    fn partial_supabase_config_is_an_error() {
        let settings = SyncSettings {
            supabase_url: Some("https://demo.supabase.co".to_string()),
            ..SyncSettings::default()
        };
        assert!(settings.supabase().is_err());
    }

    #[test]
    fn invalid_env_number_is_rejected() {
        let mut settings = SyncSettings::default();
        assert!(settings
            .apply_env(lookup(&[(ENV_REQUEST_TIMEOUT_SECS, "soon")]))
            .is_err());
    }

    #[test]
    fn file_roundtrip_and_unknown_fields() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("nested").join(CONFIG_FILE_NAME);

        let settings = SyncSettings {
            unsynced_delete_policy: UnsyncedDeletePolicy::EnqueueDelete,
            ..SyncSettings::default()
        };
        settings.save_to_path(&path).unwrap();
        assert_eq!(SyncSettings::load_from_path(&path).unwrap(), settings);

        std::fs::write(&path, r#"{ "sync_every": 3 }"#).unwrap();
        let error = SyncSettings::load_from_path(&path).unwrap_err();
        assert!(error.to_string().contains("unknown field"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let tmp = tempdir().unwrap();
        let settings = SyncSettings::load_from_path(&tmp.path().join("none.json")).unwrap();
        assert_eq!(settings, SyncSettings::default());
    }
}
