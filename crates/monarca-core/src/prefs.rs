//! Persisted user preferences.
//!
//! Preferences are a flat string map written to `prefs.json` in the config
//! directory. Each value is keyed independently, so an unreadable or unknown
//! value only resets that one setting.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::{debug, warn};

/// Preferences file name in the config directory
const PREFS_FILE: &str = "prefs.json";

const KEY_NICKNAME: &str = "nickname";
const KEY_LANGUAGE: &str = "language";
const KEY_THEME: &str = "theme";

/// Label used when no nickname has been chosen.
pub const ANONYMOUS_NICKNAME: &str = "Anónimo";

/// String key-value store backed by a JSON file.
pub struct LocalStore {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl LocalStore {
    /// Open the store at `dir/prefs.json`. A missing file is an empty store.
    pub fn open(dir: &Path) -> Result<Self> {
        let path = dir.join(PREFS_FILE);
        let values = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .context("Failed to read preferences file")?;
            match serde_json::from_str(&contents) {
                Ok(values) => values,
                Err(e) => {
                    warn!(error = %e, "Preferences file is corrupt, starting fresh");
                    BTreeMap::new()
                }
            }
        } else {
            BTreeMap::new()
        };
        Ok(Self { path, values })
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Set a value and write the store back to disk.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.values.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(&self.values)?;
        std::fs::write(&self.path, contents).context("Failed to write preferences file")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Language {
    #[default]
    Es,
    En,
}

impl Language {
    pub fn code(&self) -> &'static str {
        match self {
            Language::Es => "es",
            Language::En => "en",
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "es" => Ok(Language::Es),
            "en" => Ok(Language::En),
            other => Err(anyhow::anyhow!("Unknown language: {}", other)),
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub enum Theme {
    #[default]
    Dark,
    Light,
}

impl Theme {
    pub fn name(&self) -> &'static str {
        match self {
            Theme::Dark => "dark",
            Theme::Light => "light",
        }
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "dark" => Ok(Theme::Dark),
            "light" => Ok(Theme::Light),
            other => Err(anyhow::anyhow!("Unknown theme: {}", other)),
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Typed view over the persisted nickname, language and theme.
pub struct Preferences {
    store: LocalStore,
}

impl Preferences {
    pub fn open(dir: &Path) -> Result<Self> {
        Ok(Self {
            store: LocalStore::open(dir)?,
        })
    }

    pub fn nickname(&self) -> String {
        self.store
            .get(KEY_NICKNAME)
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(ANONYMOUS_NICKNAME)
            .to_string()
    }

    /// Store a nickname and return the value actually saved.
    pub fn set_nickname(&mut self, name: &str) -> Result<String> {
        let nickname = normalize_nickname(name);
        self.store.set(KEY_NICKNAME, &nickname)?;
        debug!(nickname = %nickname, "Nickname saved");
        Ok(nickname)
    }

    pub fn language(&self) -> Language {
        self.parsed(KEY_LANGUAGE)
    }

    pub fn set_language(&mut self, language: Language) -> Result<()> {
        self.store.set(KEY_LANGUAGE, language.code())
    }

    pub fn theme(&self) -> Theme {
        self.parsed(KEY_THEME)
    }

    pub fn set_theme(&mut self, theme: Theme) -> Result<()> {
        self.store.set(KEY_THEME, theme.name())
    }

    fn parsed<T: FromStr + Default>(&self, key: &str) -> T {
        self.store
            .get(key)
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }
}

/// Trim a nickname, falling back to the anonymous label when blank.
pub fn normalize_nickname(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        ANONYMOUS_NICKNAME.to_string()
    } else {
        trimmed.to_string()
    }
}
