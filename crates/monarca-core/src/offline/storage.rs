//! Cache generation storage.
//!
//! A generation is a named set of cached responses. Two backends exist:
//! `MemoryStorage` for tests and throwaway runs, and `DiskStorage` which
//! keeps one directory per generation under the cache directory.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;

use super::fetcher::{AssetResponse, ResponseSource};

/// A stored response body plus the metadata needed to replay it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedAsset {
    pub key: String,
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
    pub cached_at: DateTime<Utc>,
}

impl CachedAsset {
    pub fn from_response(key: impl Into<String>, response: &AssetResponse) -> Self {
        Self {
            key: key.into(),
            status: response.status,
            content_type: response.content_type.clone(),
            body: response.body.clone(),
            cached_at: Utc::now(),
        }
    }

    pub fn into_response(self) -> AssetResponse {
        AssetResponse {
            status: self.status,
            content_type: self.content_type,
            body: self.body,
            source: ResponseSource::Cache,
            cached_at: Some(self.cached_at),
        }
    }

    pub fn age_minutes(&self) -> i64 {
        (Utc::now() - self.cached_at).num_minutes()
    }

    pub fn age_display(&self) -> String {
        let minutes = self.age_minutes();
        if minutes < 1 {
            // Also covers clock skew
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            format!("{}h ago", minutes / 60)
        } else {
            format!("{}d ago", minutes / 1440)
        }
    }
}

/// Backend holding every cache generation.
pub trait CacheStorage: Send + Sync + 'static {
    /// Open a generation, creating it when absent. Returns true if created.
    fn open(&self, generation: &str) -> Result<bool>;

    fn generations(&self) -> Result<Vec<String>>;

    /// Delete a generation and everything in it. Returns false if it did not exist.
    fn delete(&self, generation: &str) -> Result<bool>;

    fn get(&self, generation: &str, key: &str) -> Result<Option<CachedAsset>>;

    /// Insert or replace an entry. The generation is created if needed.
    fn put(&self, generation: &str, asset: CachedAsset) -> Result<()>;

    fn keys(&self, generation: &str) -> Result<Vec<String>>;
}

#[derive(Default)]
pub struct MemoryStorage {
    generations: RwLock<BTreeMap<String, HashMap<String, CachedAsset>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, HashMap<String, CachedAsset>>>> {
        self.generations
            .read()
            .map_err(|_| anyhow::anyhow!("Cache storage lock poisoned"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, HashMap<String, CachedAsset>>>> {
        self.generations
            .write()
            .map_err(|_| anyhow::anyhow!("Cache storage lock poisoned"))
    }
}

impl CacheStorage for MemoryStorage {
    fn open(&self, generation: &str) -> Result<bool> {
        let mut generations = self.write()?;
        if generations.contains_key(generation) {
            return Ok(false);
        }
        generations.insert(generation.to_string(), HashMap::new());
        Ok(true)
    }

    fn generations(&self) -> Result<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn delete(&self, generation: &str) -> Result<bool> {
        Ok(self.write()?.remove(generation).is_some())
    }

    fn get(&self, generation: &str, key: &str) -> Result<Option<CachedAsset>> {
        Ok(self
            .read()?
            .get(generation)
            .and_then(|entries| entries.get(key))
            .cloned())
    }

    fn put(&self, generation: &str, asset: CachedAsset) -> Result<()> {
        self.write()?
            .entry(generation.to_string())
            .or_default()
            .insert(asset.key.clone(), asset);
        Ok(())
    }

    fn keys(&self, generation: &str) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .read()?
            .get(generation)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        Ok(keys)
    }
}

/// Metadata written next to each body file.
#[derive(Debug, Serialize, Deserialize)]
struct EntryMeta {
    key: String,
    status: u16,
    content_type: Option<String>,
    cached_at: DateTime<Utc>,
}

/// Generations stored as directories: `<root>/<generation>/<sha256(key)>.{json,bin}`.
pub struct DiskStorage {
    root: PathBuf,
}

impl DiskStorage {
    pub fn new(root: PathBuf) -> Result<Self> {
        std::fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create cache directory {}", root.display()))?;
        Ok(Self { root })
    }

    fn generation_dir(&self, generation: &str) -> Result<PathBuf> {
        if generation.is_empty()
            || generation.starts_with('.')
            || generation.contains(['/', '\\'])
        {
            anyhow::bail!("Invalid cache generation name: {:?}", generation);
        }
        Ok(self.root.join(generation))
    }

    fn entry_stem(dir: &Path, key: &str) -> PathBuf {
        let digest = Sha256::digest(key.as_bytes());
        dir.join(hex::encode(digest))
    }

    fn read_meta(path: &Path) -> Result<EntryMeta> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read cache entry: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse cache entry: {}", path.display()))
    }
}

impl CacheStorage for DiskStorage {
    fn open(&self, generation: &str) -> Result<bool> {
        let dir = self.generation_dir(generation)?;
        if dir.is_dir() {
            return Ok(false);
        }
        std::fs::create_dir_all(&dir)?;
        debug!(generation, "Created cache generation");
        Ok(true)
    }

    fn generations(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    fn delete(&self, generation: &str) -> Result<bool> {
        let dir = self.generation_dir(generation)?;
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir)
            .with_context(|| format!("Failed to delete cache generation {}", generation))?;
        Ok(true)
    }

    fn get(&self, generation: &str, key: &str) -> Result<Option<CachedAsset>> {
        let stem = Self::entry_stem(&self.generation_dir(generation)?, key);
        let meta_path = stem.with_extension("json");
        if !meta_path.exists() {
            return Ok(None);
        }

        let meta = Self::read_meta(&meta_path)?;
        if meta.key != key {
            // Digest collision; treat as a miss
            return Ok(None);
        }
        let body = std::fs::read(stem.with_extension("bin"))
            .with_context(|| format!("Failed to read cached body for {}", key))?;

        Ok(Some(CachedAsset {
            key: meta.key,
            status: meta.status,
            content_type: meta.content_type,
            body,
            cached_at: meta.cached_at,
        }))
    }

    fn put(&self, generation: &str, asset: CachedAsset) -> Result<()> {
        let dir = self.generation_dir(generation)?;
        std::fs::create_dir_all(&dir)?;
        let stem = Self::entry_stem(&dir, &asset.key);

        // Body first so a readable meta file always has its body
        std::fs::write(stem.with_extension("bin"), &asset.body)?;
        let meta = EntryMeta {
            key: asset.key,
            status: asset.status,
            content_type: asset.content_type,
            cached_at: asset.cached_at,
        };
        std::fs::write(stem.with_extension("json"), serde_json::to_string_pretty(&meta)?)?;
        Ok(())
    }

    fn keys(&self, generation: &str) -> Result<Vec<String>> {
        let dir = self.generation_dir(generation)?;
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                keys.push(Self::read_meta(&path)?.key);
            }
        }
        keys.sort();
        Ok(keys)
    }
}
