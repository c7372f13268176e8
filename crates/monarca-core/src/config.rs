//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which covers the remote message store, the offline asset cache, the
//! realtime socket and chat behavior.
//!
//! Configuration is stored at `~/.config/radio-monarca/config.json`.
//! A handful of environment variables override the file so deployments can
//! point at a different backend without editing it.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::offline::RouteRules;

/// Application name used for config/cache directory paths
pub const APP_NAME: &str = "radio-monarca";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Version tag of the static asset bundle shipped with this build.
pub const DEFAULT_CACHE_VERSION: &str = "radio-monarca-v6";

/// Paths precached on install.
const DEFAULT_ASSETS: &[&str] = &[
    "/",
    "/index.html",
    "/styles.css",
    "/app.js",
    "/manifest.json",
    "/logo_monarca.png",
    "/background_monarca.jpg",
    "/icons/icon-192.png",
    "/icons/icon-512.png",
];

const ENV_REMOTE_URL: &str = "MONARCA_REMOTE_URL";
const ENV_ANON_KEY: &str = "MONARCA_ANON_KEY";
const ENV_CACHE_VERSION: &str = "MONARCA_CACHE_VERSION";
const ENV_ORIGIN: &str = "MONARCA_ORIGIN";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub remote: RemoteConfig,
    pub offline: OfflineConfig,
    pub realtime: RealtimeConfig,
    pub chat: ChatConfig,
}

/// Where the hosted message store lives and which table carries the chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    pub url: String,
    pub anon_key: String,
    pub schema: String,
    pub table: String,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            url: "http://127.0.0.1:54321".to_string(),
            anon_key: String::new(),
            schema: "public".to_string(),
            table: "messages".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineConfig {
    /// Name of the current cache generation
    pub version: String,
    /// Origin the asset paths are resolved against
    pub origin: String,
    pub assets: Vec<String>,
    pub rules: RouteRules,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            version: DEFAULT_CACHE_VERSION.to_string(),
            origin: "http://127.0.0.1:8080".to_string(),
            assets: DEFAULT_ASSETS.iter().map(|s| s.to_string()).collect(),
            rules: RouteRules::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RealtimeConfig {
    pub heartbeat_secs: u64,
    /// Reconnect with backoff when the socket drops
    pub reconnect: bool,
    pub max_backoff_secs: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: 30,
            reconnect: true,
            max_backoff_secs: 30,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub history_limit: usize,
    /// Seconds an accepted send waits for its push echo before it is shown
    /// as a confirmed local entry.
    pub pending_timeout_secs: u64,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_limit: 50,
            pending_timeout_secs: 10,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Apply overrides from a variable lookup (the process environment in
    /// practice). Empty values are ignored.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(url) = get(ENV_REMOTE_URL) {
            self.remote.url = url;
        }
        if let Some(key) = get(ENV_ANON_KEY) {
            self.remote.anon_key = key;
        }
        if let Some(version) = get(ENV_CACHE_VERSION) {
            self.offline.version = version;
        }
        if let Some(origin) = get(ENV_ORIGIN) {
            self.offline.origin = origin;
        }
    }

    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.offline.version, DEFAULT_CACHE_VERSION);
        assert_eq!(config.offline.assets.len(), 9);
        assert_eq!(config.realtime.heartbeat_secs, 30);
        assert_eq!(config.chat.history_limit, 50);
        assert_eq!(config.remote.table, "messages");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let json = r#"{"remote": {"url": "https://example.supabase.co"}}"#;
        let config: Config = serde_json::from_str(json).expect("partial config should parse");
        assert_eq!(config.remote.url, "https://example.supabase.co");
        assert_eq!(config.remote.schema, "public");
        assert_eq!(config.offline.version, DEFAULT_CACHE_VERSION);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            (ENV_REMOTE_URL, "https://abc.supabase.co"),
            (ENV_ANON_KEY, "anon"),
            (ENV_CACHE_VERSION, "radio-monarca-v7"),
            (ENV_ORIGIN, "   "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.remote.url, "https://abc.supabase.co");
        assert_eq!(config.remote.anon_key, "anon");
        assert_eq!(config.offline.version, "radio-monarca-v7");
        // Blank values leave the default in place
        assert_eq!(config.offline.origin, OfflineConfig::default().origin);
    }
}
