//! Shared configuration for Basis panel tools.
//!
//! TOML profiles layered under `BASIS_` environment variables, client
//! secret resolution (env + keyring + plaintext), translation to
//! `basis_core::ControllerConfig`, and the credential stores that keep
//! the OAuth2 token pair across runs.

mod credentials;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use basis_core::config::{DEFAULT_API_URL, DEFAULT_TOKEN_URL};
use basis_core::{ControllerConfig, OAuthClientConfig};

pub use credentials::{FileCredentialStore, KeyringCredentialStore};

/// Keyring service name shared by every stored secret.
pub const KEYRING_SERVICE: &str = "basis";

/// OAuth2 client id registered for this tool.
pub const DEFAULT_CLIENT_ID: &str = "basis-panel-sync";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("profile '{profile}' is not defined")]
    UnknownProfile { profile: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Profile used when none is named on the command line.
    pub default_profile: Option<String>,

    #[serde(default)]
    pub defaults: Defaults,

    /// Named cloud accounts.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// The named profile, or the default one. A missing `default`
    /// profile falls back to production settings.
    pub fn profile(&self, name: Option<&str>) -> Result<(String, Profile), ConfigError> {
        let name = name
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into());

        match self.profiles.get(&name) {
            Some(profile) => Ok((name, profile.clone())),
            None if name == "default" => Ok((name, Profile::default())),
            None => Err(ConfigError::UnknownProfile { profile: name }),
        }
    }
}

/// Values applied to every profile unless it overrides them.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Telemetry cadence in seconds.
    #[serde(default = "default_fast_interval")]
    pub fast_interval: u64,

    /// Statistics cadence in seconds.
    #[serde(default = "default_slow_interval")]
    pub slow_interval: u64,

    /// Panel re-discovery cadence in seconds; 0 disables it.
    #[serde(default = "default_discovery_interval")]
    pub discovery_interval: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            fast_interval: default_fast_interval(),
            slow_interval: default_slow_interval(),
            discovery_interval: default_discovery_interval(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_fast_interval() -> u64 {
    30
}
fn default_slow_interval() -> u64 {
    300
}
fn default_discovery_interval() -> u64 {
    300
}

/// One cloud account.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Cloud REST base URL.
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// OAuth2 token endpoint.
    #[serde(default = "default_token_url")]
    pub token_url: String,

    #[serde(default = "default_client_id")]
    pub client_id: String,

    /// Client secret (plaintext, prefer keyring or env var).
    pub client_secret: Option<String>,

    /// Environment variable name containing the client secret.
    pub client_secret_env: Option<String>,

    pub timeout: Option<u64>,
    pub fast_interval: Option<u64>,
    pub slow_interval: Option<u64>,
    pub discovery_interval: Option<u64>,
    pub stale_after_intervals: Option<u32>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token_url: default_token_url(),
            client_id: default_client_id(),
            client_secret: None,
            client_secret_env: None,
            timeout: None,
            fast_interval: None,
            slow_interval: None,
            discovery_interval: None,
            stale_after_intervals: None,
        }
    }
}

fn default_api_url() -> String {
    DEFAULT_API_URL.into()
}
fn default_token_url() -> String {
    DEFAULT_TOKEN_URL.into()
}
fn default_client_id() -> String {
    DEFAULT_CLIENT_ID.into()
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("io", "wearebasis", "basis")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Directory for the file-based token store.
pub fn data_dir() -> PathBuf {
    project_dirs().map_or_else(dirs_fallback, |dirs| dirs.data_dir().to_path_buf())
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("basis");
    p
}

// ── Loading and saving ──────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit file, still layered under `BASIS_` env vars.
///
/// Nested keys use a double underscore:
/// `BASIS_PROFILES__HOME__CLIENT_ID=...`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("BASIS_").split("__"));

    let config: Config = figment.extract()?;
    tracing::debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file is missing or unreadable.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Resolution ──────────────────────────────────────────────────────

/// Resolve the OAuth2 client secret. Public clients have none.
pub fn resolve_client_secret(profile: &Profile, profile_name: &str) -> Option<SecretString> {
    // 1. Profile's client_secret_env → env var lookup
    if let Some(val) = profile
        .client_secret_env
        .as_ref()
        .and_then(|name| std::env::var(name).ok())
    {
        return Some(SecretString::from(val));
    }

    // 2. System keyring
    if let Some(secret) =
        keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/client-secret"))
            .ok()
            .and_then(|entry| entry.get_password().ok())
    {
        return Some(SecretString::from(secret));
    }

    // 3. Plaintext in config
    profile.client_secret.clone().map(SecretString::from)
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// Build a `ControllerConfig` from a profile and the global defaults.
pub fn profile_to_controller_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<ControllerConfig, ConfigError> {
    let api_url = parse_url("api_url", &profile.api_url)?;
    let token_url = parse_url("token_url", &profile.token_url)?;

    if profile.client_id.trim().is_empty() {
        return Err(ConfigError::Validation {
            field: "client_id".into(),
            reason: "must not be empty".into(),
        });
    }

    let fast_interval = profile.fast_interval.unwrap_or(defaults.fast_interval);
    if fast_interval == 0 {
        return Err(ConfigError::Validation {
            field: "fast_interval".into(),
            reason: "must be at least 1 second".into(),
        });
    }

    let mut config = ControllerConfig::new(
        api_url,
        OAuthClientConfig {
            token_url,
            client_id: profile.client_id.clone(),
            client_secret: resolve_client_secret(profile, profile_name),
        },
    );
    config.timeout = Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout).max(1));
    config.fast_interval = Duration::from_secs(fast_interval);
    config.slow_interval =
        Duration::from_secs(profile.slow_interval.unwrap_or(defaults.slow_interval).max(1));
    config.discovery_interval = Duration::from_secs(
        profile
            .discovery_interval
            .unwrap_or(defaults.discovery_interval),
    );
    if let Some(n) = profile.stale_after_intervals {
        config.stale_after_intervals = n;
    }
    Ok(config)
}
