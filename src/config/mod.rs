// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration for arrgate.
//!
//! Two layers:
//!
//! - [`Config`]: the persisted file (`~/.arrgate/config.json`), serde with
//!   defaults, plus environment overrides for secrets.
//! - [`ClientConfig`]: the validated, immutable per-backend configuration a
//!   client is built from. Produced by [`BackendSettings::to_client_config`]
//!   or constructed directly with [`ClientConfig::new`].

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

use crate::auth::AuthStrategy;
use crate::types::{BackendKind, CompatibilityMode};

/// Environment variable overriding the series manager API key.
pub const ENV_SERIES_API_KEY: &str = "ARRGATE_SERIES_API_KEY";
/// Environment variable overriding the movie manager API key.
pub const ENV_MOVIES_API_KEY: &str = "ARRGATE_MOVIES_API_KEY";
/// Environment variable overriding the library server API key.
pub const ENV_LIBRARY_API_KEY: &str = "ARRGATE_LIBRARY_API_KEY";
/// Environment variable overriding the library server user id.
pub const ENV_LIBRARY_USER_ID: &str = "ARRGATE_LIBRARY_USER_ID";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid base URL for {backend}: {reason}")]
    InvalidUrl { backend: BackendKind, reason: String },

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("no {0} backend configured")]
    MissingBackend(BackendKind),

    #[error("no API key configured for the {0} backend")]
    MissingApiKey(BackendKind),

    #[error("could not find home directory")]
    MissingHomeDir,

    #[error("failed to read or write config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

// =============================================================================
// CLIENT CONFIG
// =============================================================================

/// Connection-pool tuning for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Maximum concurrent in-flight requests.
    pub max_sockets: usize,
    /// Maximum idle keep-alive connections kept per host.
    pub max_free_sockets: usize,
    /// How long an idle connection is kept.
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_sockets: 10,
            max_free_sockets: 5,
            idle_timeout: Duration::from_secs(30),
        }
    }
}

/// Circuit-breaker tuning for one backend.
#[derive(Debug, Clone, PartialEq)]
pub struct BreakerConfig {
    /// Consecutive outage-class failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before letting a probe through.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
        }
    }
}

/// Validated configuration for one backend client. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub backend: BackendKind,
    /// Base URL without a trailing slash.
    pub base_url: String,
    /// Per-attempt HTTP timeout.
    pub timeout: Duration,
    /// Total attempts per logical call (first try included).
    pub max_retries: u32,
    pub backoff_multiplier: f64,
    pub max_backoff: Duration,
    /// Fraction of the computed delay added as random jitter (0.0 - 1.0).
    pub jitter_ratio: f64,
    pub pool: PoolConfig,
    pub breaker: BreakerConfig,
    pub compatibility: CompatibilityMode,
    /// Versions known to work, as `major.minor.patch`.
    pub supported_versions: Vec<String>,
    /// Version assumed when detection fails.
    pub fallback_version: String,
}

impl ClientConfig {
    /// Build a config with per-backend defaults.
    pub fn new(backend: BackendKind, base_url: &str) -> Result<Self, ConfigError> {
        let config = Self {
            backend,
            base_url: normalize_base_url(backend, base_url)?,
            timeout: Duration::from_secs(30),
            max_retries: 3,
            backoff_multiplier: 2.0,
            max_backoff: Duration::from_secs(60),
            jitter_ratio: 0.1,
            pool: PoolConfig::default(),
            breaker: BreakerConfig::default(),
            compatibility: CompatibilityMode::default(),
            supported_versions: default_supported_versions(backend),
            fallback_version: default_fallback_version(backend).to_string(),
        };
        Ok(config)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_backoff(mut self, multiplier: f64, max_backoff: Duration, jitter_ratio: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self.max_backoff = max_backoff;
        self.jitter_ratio = jitter_ratio;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_breaker(mut self, breaker: BreakerConfig) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn with_compatibility(mut self, mode: CompatibilityMode) -> Self {
        self.compatibility = mode;
        self
    }

    pub fn with_versions(mut self, supported: Vec<String>, fallback: impl Into<String>) -> Self {
        self.supported_versions = supported;
        self.fallback_version = fallback.into();
        self
    }

    /// Check every tunable is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        normalize_base_url(self.backend, &self.base_url)?;

        if self.timeout.is_zero() {
            return Err(invalid("timeout", "must be greater than zero"));
        }
        if self.max_retries == 0 {
            return Err(invalid("max_retries", "at least one attempt is required"));
        }
        if !(self.backoff_multiplier >= 1.0) {
            return Err(invalid("backoff_multiplier", "must be >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_ratio) {
            return Err(invalid("jitter_ratio", "must be between 0.0 and 1.0"));
        }
        if self.pool.max_sockets == 0 {
            return Err(invalid("max_sockets", "must be greater than zero"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(invalid("failure_threshold", "must be greater than zero"));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.to_string(),
    }
}

fn normalize_base_url(backend: BackendKind, raw: &str) -> Result<String, ConfigError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let url = Url::parse(trimmed).map_err(|e| ConfigError::InvalidUrl {
        backend,
        reason: e.to_string(),
    })?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(ConfigError::InvalidUrl {
            backend,
            reason: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if url.host_str().is_none() {
        return Err(ConfigError::InvalidUrl {
            backend,
            reason: "missing host".to_string(),
        });
    }

    Ok(trimmed.to_string())
}

/// Versions each backend family has been exercised against.
pub fn default_supported_versions(backend: BackendKind) -> Vec<String> {
    let versions: &[&str] = match backend {
        BackendKind::SeriesManager => &["3.0.0", "4.0.0"],
        BackendKind::MovieManager => &["4.0.0", "5.0.0"],
        BackendKind::LibraryServer => &["10.8.0", "10.9.0", "10.10.0"],
    };
    versions.iter().map(|v| v.to_string()).collect()
}

pub fn default_fallback_version(backend: BackendKind) -> &'static str {
    match backend {
        BackendKind::SeriesManager => "4.0.0",
        BackendKind::MovieManager => "5.0.0",
        BackendKind::LibraryServer => "10.9.0",
    }
}

// =============================================================================
// PERSISTED CONFIG
// =============================================================================

/// One backend's entry in the config file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackendSettings {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Library server only: user the query auth runs as.
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_backoff_secs")]
    pub max_backoff_secs: u64,
    #[serde(default = "default_jitter_ratio")]
    pub jitter_ratio: f64,
    #[serde(default = "default_max_sockets")]
    pub max_sockets: usize,
    #[serde(default = "default_max_free_sockets")]
    pub max_free_sockets: usize,
    #[serde(default)]
    pub compatibility: CompatibilityMode,
    /// Overrides the built-in supported-version table.
    #[serde(default)]
    pub supported_versions: Option<Vec<String>>,
    #[serde(default)]
    pub fallback_version: Option<String>,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_max_backoff_secs() -> u64 {
    60
}

fn default_jitter_ratio() -> f64 {
    0.1
}

fn default_max_sockets() -> usize {
    10
}

fn default_max_free_sockets() -> usize {
    5
}

fn default_operation_timeout_secs() -> u64 {
    120
}

impl BackendSettings {
    /// Settings for `base_url` with every tunable at its default.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            user_id: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            backoff_multiplier: default_backoff_multiplier(),
            max_backoff_secs: default_max_backoff_secs(),
            jitter_ratio: default_jitter_ratio(),
            max_sockets: default_max_sockets(),
            max_free_sockets: default_max_free_sockets(),
            compatibility: CompatibilityMode::default(),
            supported_versions: None,
            fallback_version: None,
        }
    }

    /// Build and validate the immutable client config.
    pub fn to_client_config(&self, backend: BackendKind) -> Result<ClientConfig, ConfigError> {
        let mut config = ClientConfig::new(backend, &self.base_url)?
            .with_timeout(Duration::from_secs(self.timeout_secs))
            .with_max_retries(self.max_retries)
            .with_backoff(
                self.backoff_multiplier,
                Duration::from_secs(self.max_backoff_secs),
                self.jitter_ratio,
            )
            .with_pool(PoolConfig {
                max_sockets: self.max_sockets,
                max_free_sockets: self.max_free_sockets,
                ..PoolConfig::default()
            })
            .with_compatibility(self.compatibility);

        if let Some(ref versions) = self.supported_versions {
            config.supported_versions = versions.clone();
        }
        if let Some(ref fallback) = self.fallback_version {
            config.fallback_version = fallback.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// The auth strategy this backend family uses.
    pub fn auth_strategy(&self, backend: BackendKind) -> Result<AuthStrategy, ConfigError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey(backend))?;

        Ok(match backend {
            BackendKind::SeriesManager | BackendKind::MovieManager => {
                AuthStrategy::api_key_header(key)
            }
            BackendKind::LibraryServer => AuthStrategy::api_key_query(key, self.user_id.clone()),
        })
    }
}

/// The persisted configuration file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub series: Option<BackendSettings>,
    #[serde(default)]
    pub movies: Option<BackendSettings>,
    #[serde(default)]
    pub library: Option<BackendSettings>,
    /// Overall deadline for one orchestration call.
    #[serde(default = "default_operation_timeout_secs")]
    pub operation_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            series: None,
            movies: None,
            library: None,
            operation_timeout_secs: default_operation_timeout_secs(),
        }
    }
}

impl Config {
    /// Settings for one backend, or `MissingBackend`.
    pub fn backend(&self, kind: BackendKind) -> Result<&BackendSettings, ConfigError> {
        let settings = match kind {
            BackendKind::SeriesManager => self.series.as_ref(),
            BackendKind::MovieManager => self.movies.as_ref(),
            BackendKind::LibraryServer => self.library.as_ref(),
        };
        settings.ok_or(ConfigError::MissingBackend(kind))
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    /// Apply `ARRGATE_*` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup (environment in production).
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let overrides = [
            (ENV_SERIES_API_KEY, self.series.as_mut()),
            (ENV_MOVIES_API_KEY, self.movies.as_mut()),
            (ENV_LIBRARY_API_KEY, self.library.as_mut()),
        ];
        for (var, settings) in overrides {
            if let (Some(settings), Some(value)) = (settings, lookup(var)) {
                settings.api_key = Some(value);
            }
        }

        if let (Some(library), Some(user)) = (self.library.as_mut(), lookup(ENV_LIBRARY_USER_ID)) {
            library.user_id = Some(user);
        }
    }
}

/// `~/.arrgate`, created on first use.
pub fn get_config_dir() -> Result<PathBuf, ConfigError> {
    let home = dirs::home_dir().ok_or(ConfigError::MissingHomeDir)?;
    let config_dir = home.join(".arrgate");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir)
}

/// Load the default config file, applying environment overrides.
pub fn load_config() -> Result<Config, ConfigError> {
    let config_path = get_config_dir()?.join("config.json");
    load_config_from(&config_path)
}

/// Load a config file; a missing file yields the defaults.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let mut config = if path.exists() {
        let content = fs::read_to_string(path)?;
        serde_json::from_str(&content)?
    } else {
        Config::default()
    };

    config.apply_env_overrides();
    Ok(config)
}

pub fn save_config_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    let content = serde_json::to_string_pretty(config)?;
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::new(BackendKind::SeriesManager, "http://localhost:8989/").unwrap();
        assert_eq!(config.base_url, "http://localhost:8989");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.compatibility, CompatibilityMode::Loose);
        assert!(config.supported_versions.contains(&"4.0.0".to_string()));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_urls_rejected() {
        assert!(matches!(
            ClientConfig::new(BackendKind::MovieManager, "not a url"),
            Err(ConfigError::InvalidUrl { .. })
        ));
        assert!(matches!(
            ClientConfig::new(BackendKind::MovieManager, "ftp://host"),
            Err(ConfigError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_validation_catches_bad_tunables() {
        let base = ClientConfig::new(BackendKind::MovieManager, "http://radarr:7878").unwrap();
        assert!(base.clone().with_max_retries(0).validate().is_err());
        assert!(base
            .clone()
            .with_backoff(0.5, Duration::from_secs(10), 0.1)
            .validate()
            .is_err());
        assert!(base
            .clone()
            .with_backoff(2.0, Duration::from_secs(10), 1.5)
            .validate()
            .is_err());
        assert!(base.with_timeout(Duration::ZERO).validate().is_err());
    }

    #[test]
    fn test_settings_to_client_config() {
        let mut settings = BackendSettings::new("http://jellyfin:8096");
        settings.max_retries = 5;
        settings.supported_versions = Some(vec!["10.11.0".to_string()]);
        let config = settings.to_client_config(BackendKind::LibraryServer).unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.supported_versions, vec!["10.11.0".to_string()]);
        assert_eq!(config.fallback_version, "10.9.0");
    }

    #[test]
    fn test_auth_strategy_per_backend() {
        let mut settings = BackendSettings::new("http://sonarr:8989");
        assert!(matches!(
            settings.auth_strategy(BackendKind::SeriesManager),
            Err(ConfigError::MissingApiKey(_))
        ));

        settings.api_key = Some("key".to_string());
        settings.user_id = Some("user".to_string());
        assert!(matches!(
            settings.auth_strategy(BackendKind::SeriesManager).unwrap(),
            AuthStrategy::Header { .. }
        ));
        let library = settings.auth_strategy(BackendKind::LibraryServer).unwrap();
        assert_eq!(library.query_value("userId"), Some("user"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config {
            series: Some(BackendSettings::new("http://sonarr:8989")),
            library: Some(BackendSettings::new("http://jellyfin:8096")),
            ..Config::default()
        };
        config.apply_overrides_from(|name| match name {
            ENV_SERIES_API_KEY => Some("series-key".to_string()),
            ENV_LIBRARY_USER_ID => Some("user-7".to_string()),
            _ => None,
        });

        assert_eq!(config.series.as_ref().unwrap().api_key.as_deref(), Some("series-key"));
        assert_eq!(config.library.as_ref().unwrap().user_id.as_deref(), Some("user-7"));
        assert!(config.movies.is_none());
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");

        let config = Config {
            movies: Some(BackendSettings::new("http://radarr:7878")),
            operation_timeout_secs: 90,
            ..Config::default()
        };
        save_config_to(&config, &path).unwrap();

        let loaded: Config = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.json")).unwrap();
        assert_eq!(config.operation_timeout_secs, 120);
        assert!(matches!(
            config.backend(BackendKind::SeriesManager),
            Err(ConfigError::MissingBackend(_))
        ));
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let json = r#"{"series": {"base_url": "http://sonarr:8989", "api_key": "k"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        let series = config.series.unwrap();
        assert_eq!(series.timeout_secs, 30);
        assert_eq!(series.max_retries, 3);
        assert_eq!(config.operation_timeout_secs, 120);
    }
}
