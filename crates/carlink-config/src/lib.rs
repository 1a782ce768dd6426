//! Configuration and token persistence for carlink.
//!
//! TOML config file, environment overrides, translation to
//! `carlink_core::CoordinatorConfig`, and persisted credentials. The
//! refresh token and its companions live in the system keyring; the
//! config file carries only non-secret settings.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use carlink_api::auth::{AuthEndpoints, TokenSet};
use carlink_core::CoordinatorConfig;

/// Keyring service name.
const KEYRING_SERVICE: &str = "carlink";
/// Keyring entry holding the serialized token set.
const KEYRING_TOKENS: &str = "tokens";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no stored credentials -- run `carlink login` first")]
    NoStoredTokens,

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("keyring error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("stored tokens are corrupt: {0}")]
    TokenFormat(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config ─────────────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// OAuth client id issued by the vendor portal.
    #[serde(default)]
    pub client_id: String,

    /// Telemetry container id, filled in after first run so later
    /// starts skip the container discovery calls.
    pub container_id: Option<String>,

    /// Override the telemetry API base URL.
    pub api_base_url: Option<String>,

    /// Override the push-stream URL.
    pub stream_url: Option<String>,

    /// Override the auth service base URL.
    pub auth_base_url: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_call_ceiling")]
    pub call_ceiling: usize,

    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            container_id: None,
            api_base_url: None,
            stream_url: None,
            auth_base_url: None,
            poll_interval_secs: default_poll_interval(),
            call_ceiling: default_call_ceiling(),
            refresh_margin_secs: default_refresh_margin(),
            timeout_secs: default_timeout(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1_800
}
fn default_call_ceiling() -> usize {
    50
}
fn default_refresh_margin() -> u64 {
    300
}
fn default_timeout() -> u64 {
    30
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "carlink", "carlink").map_or_else(
        || {
            let mut p = dirs_fallback();
            p.push("config.toml");
            p
        },
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("carlink");
    p
}

// ── Config loading / saving ─────────────────────────────────────────

/// Load the Config from file + environment (`CARLINK_*` overrides).
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from an explicit path; the figment layering is shared with
/// [`load_config`] and exercised directly in tests.
pub fn load_config_from(path: &std::path::Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("CARLINK_"));

    let config: Config = figment.extract()?;
    Ok(config)
}

pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &std::path::Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Coordinator config translation ──────────────────────────────────

/// Build a `CoordinatorConfig` from the loaded settings.
pub fn to_coordinator_config(cfg: &Config) -> Result<CoordinatorConfig, ConfigError> {
    if cfg.client_id.is_empty() {
        return Err(ConfigError::Validation {
            field: "client_id".into(),
            reason: "required; create one in the vendor portal".into(),
        });
    }

    let mut out = CoordinatorConfig {
        client_id: cfg.client_id.clone(),
        poll_interval: Duration::from_secs(cfg.poll_interval_secs),
        call_ceiling: cfg.call_ceiling,
        refresh_margin: Duration::from_secs(cfg.refresh_margin_secs),
        timeout: Duration::from_secs(cfg.timeout_secs),
        ..CoordinatorConfig::default()
    };

    if let Some(ref raw) = cfg.api_base_url {
        out.api_base_url = parse_url("api_base_url", raw)?;
    }
    if let Some(ref raw) = cfg.stream_url {
        out.stream_url = parse_url("stream_url", raw)?;
    }
    if let Some(ref raw) = cfg.auth_base_url {
        let base = parse_url("auth_base_url", raw)?;
        out.auth_endpoints =
            AuthEndpoints::with_base(&base).map_err(|e| ConfigError::Validation {
                field: "auth_base_url".into(),
                reason: e.to_string(),
            })?;
    }

    Ok(out)
}

fn parse_url(field: &str, raw: &str) -> Result<url::Url, ConfigError> {
    raw.parse().map_err(|_| ConfigError::Validation {
        field: field.into(),
        reason: format!("invalid URL: {raw}"),
    })
}

/// The rolling budget window, re-exported for display purposes.
pub const BUDGET_WINDOW: Duration = CoordinatorConfig::BUDGET_WINDOW;

// ── Token persistence ───────────────────────────────────────────────

/// Serializable form of a token set, stored as one JSON blob in the
/// system keyring. Plain `String` here because `SecretString` is
/// deliberately write-only; the blob itself lives in the keyring.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub id_token: String,
    pub account_id: String,
    pub expires_at: DateTime<Utc>,
}

impl From<&TokenSet> for StoredTokens {
    fn from(tokens: &TokenSet) -> Self {
        Self {
            access_token: tokens.access_token.expose_secret().to_owned(),
            refresh_token: tokens.refresh_token.expose_secret().to_owned(),
            id_token: tokens.id_token.expose_secret().to_owned(),
            account_id: tokens.account_id.clone(),
            expires_at: tokens.expires_at,
        }
    }
}

impl From<StoredTokens> for TokenSet {
    fn from(stored: StoredTokens) -> Self {
        Self {
            access_token: SecretString::from(stored.access_token),
            refresh_token: SecretString::from(stored.refresh_token),
            id_token: SecretString::from(stored.id_token),
            account_id: stored.account_id,
            expires_at: stored.expires_at,
        }
    }
}

/// Persist the token set to the system keyring.
pub fn save_tokens(tokens: &TokenSet) -> Result<(), ConfigError> {
    let blob = serde_json::to_string(&StoredTokens::from(tokens))?;
    keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKENS)?.set_password(&blob)?;
    Ok(())
}

/// Load the token set from the system keyring.
pub fn load_tokens() -> Result<TokenSet, ConfigError> {
    let entry = keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKENS)?;
    let blob = match entry.get_password() {
        Ok(blob) => blob,
        Err(keyring::Error::NoEntry) => return Err(ConfigError::NoStoredTokens),
        Err(e) => return Err(e.into()),
    };
    let stored: StoredTokens = serde_json::from_str(&blob)?;
    Ok(stored.into())
}

/// Remove stored tokens (logout).
pub fn clear_tokens() -> Result<(), ConfigError> {
    match keyring::Entry::new(KEYRING_SERVICE, KEYRING_TOKENS)?.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

// ── Tests ───────────────────────────────────────────────────────────
