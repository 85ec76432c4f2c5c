//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.runchat/config.json`) and environment.
//! Passwords are never read from the file; use `RUNCHAT_PASSWORD`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Base URL used when neither config nor env sets one.
pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:8000/api";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Backend API settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Chat session defaults.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Sign-in settings.
    #[serde(default)]
    pub auth: AuthConfig,
}

/// Where the backend lives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiConfig {
    /// API root including any path prefix (e.g. "https://insights.example.org/api"). Overridden by RUNCHAT_API_BASE_URL.
    pub base_url: Option<String>,
}

/// Chat defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatConfig {
    /// "stream" (default) consumes `/chat/stream/`; "sync" posts to `/chat/` and waits for the whole answer.
    #[serde(default)]
    pub flavor: BackendFlavor,
}

/// How answers are obtained from the backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendFlavor {
    /// Incremental status/answer events over a long-lived response body.
    #[default]
    Stream,

    /// One request, one complete answer.
    Sync,
}

/// Sign-in settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Account email. Overridden by RUNCHAT_EMAIL.
    pub email: Option<String>,
}

/// Email/password pair used to open a session.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

/// Resolve the API base URL: env RUNCHAT_API_BASE_URL overrides config. Trailing slashes are dropped.
pub fn resolve_api_base_url(config: &Config) -> String {
    non_empty_env("RUNCHAT_API_BASE_URL")
        .or_else(|| {
            config
                .api
                .base_url
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
        .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
        .trim_end_matches('/')
        .to_string()
}

/// Resolve sign-in credentials: email from RUNCHAT_EMAIL or config, password from RUNCHAT_PASSWORD only.
pub fn resolve_credentials(config: &Config) -> Option<Credentials> {
    let email = non_empty_env("RUNCHAT_EMAIL").or_else(|| {
        config
            .auth
            .email
            .as_ref()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    })?;
    let password = std::env::var("RUNCHAT_PASSWORD").ok().filter(|p| !p.is_empty())?;
    Some(Credentials { email, password })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("RUNCHAT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".runchat").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (RUNCHAT_CONFIG_PATH or ~/.runchat/config.json).
/// Missing file => default config. Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}
