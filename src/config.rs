//! Engine configuration loading from file and environment variables.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Reverse geocoding endpoint.
    #[serde(default)]
    pub geocoder: GeocoderConfig,

    /// Device location request settings.
    #[serde(default)]
    pub location: LocationConfig,

    /// Local store adapter settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Reconciliation settings.
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderConfig {
    /// Base URL of a Nominatim-compatible service; `/reverse` is appended.
    #[serde(default = "default_geocoder_url")]
    pub base_url: String,

    /// Nominatim's usage policy requires an identifying User-Agent.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocationConfig {
    #[serde(default = "default_true")]
    pub high_accuracy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database file used by the SQLite adapter;
    /// `:memory:` keeps everything in process.
    #[serde(default = "default_db_path")]
    pub sqlite_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// How many resolved ids the engine remembers to reject stale revivals.
    #[serde(default = "default_tombstone_capacity")]
    pub tombstone_capacity: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "incident_sync=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

fn default_geocoder_url() -> String {
    "https://nominatim.openstreetmap.org".to_string()
}

fn default_user_agent() -> String {
    concat!("incident_sync/", env!("CARGO_PKG_VERSION")).to_string()
}

fn default_true() -> bool {
    true
}

fn default_db_path() -> String {
    "incidents.db".to_string()
}

fn default_tombstone_capacity() -> usize {
    10_000
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for GeocoderConfig {
    fn default() -> Self {
        Self {
            base_url: default_geocoder_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for LocationConfig {
    fn default() -> Self {
        Self {
            high_accuracy: default_true(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: default_db_path(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tombstone_capacity: default_tombstone_capacity(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        crate::geocode::NominatimGeocoder::new(&self.geocoder)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        if self.geocoder.user_agent.trim().is_empty() {
            return Err(ConfigError::Invalid("geocoder.user_agent must not be empty".into()));
        }
        if self.sync.tombstone_capacity == 0 {
            return Err(ConfigError::Invalid("sync.tombstone_capacity must be > 0".into()));
        }
        if self.store.sqlite_path.trim().is_empty() {
            return Err(ConfigError::Invalid("store.sqlite_path must not be empty".into()));
        }
        Ok(())
    }

    /// Applies `INCIDENT_SYNC_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("INCIDENT_SYNC_GEOCODER_URL") {
            self.geocoder.base_url = url;
        }
        if let Some(path) = lookup("INCIDENT_SYNC_DB_PATH") {
            self.store.sqlite_path = path;
        }
        if let Some(level) = lookup("INCIDENT_SYNC_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("INCIDENT_SYNC_LOG_JSON") {
            self.logging.json = json.eq_ignore_ascii_case("true") || json == "1";
        }
        if let Some(high) = lookup("INCIDENT_SYNC_HIGH_ACCURACY") {
            self.location.high_accuracy = !(high.eq_ignore_ascii_case("false") || high == "0");
        }
    }
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `INCIDENT_SYNC_GEOCODER_URL` overrides `geocoder.base_url`
/// - `INCIDENT_SYNC_DB_PATH` overrides `store.sqlite_path`
/// - `INCIDENT_SYNC_LOG_LEVEL` overrides `logging.level`
/// - `INCIDENT_SYNC_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `INCIDENT_SYNC_HIGH_ACCURACY` overrides `location.high_accuracy`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed, or
/// if the resulting configuration is invalid.
pub fn load_config(path: Option<&str>) -> Result<EngineConfig, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                EngineConfig::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => EngineConfig::default(),
    };

    config.apply_overrides(|key| std::env::var(key).ok().filter(|v| !v.trim().is_empty()));
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.location.high_accuracy);
        assert_eq!(config.geocoder.base_url, "https://nominatim.openstreetmap.org");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[geocoder]\nbase_url = \"https://geo.example.com\"\n\n[logging]\njson = true"
        )
        .unwrap();

        let config = load_config(file.path().to_str()).unwrap();
        assert_eq!(config.geocoder.base_url, "https://geo.example.com");
        assert!(config.logging.json);
        assert_eq!(config.sync.tombstone_capacity, 10_000);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(load_config(path.to_str()).is_ok());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[geocoder\nbase_url = ").unwrap();
        assert!(matches!(
            load_config(file.path().to_str()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = EngineConfig::default();
        config.geocoder.base_url = "ftp://nope".into();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = EngineConfig::default();
        config.sync.tombstone_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_overrides() {
        let env: HashMap<&str, &str> = [
            ("INCIDENT_SYNC_GEOCODER_URL", "https://other.example.com"),
            ("INCIDENT_SYNC_LOG_JSON", "TRUE"),
            ("INCIDENT_SYNC_HIGH_ACCURACY", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.geocoder.base_url, "https://other.example.com");
        assert!(config.logging.json);
        assert!(!config.location.high_accuracy);
        assert_eq!(config.store.sqlite_path, "incidents.db");
    }
}
