//! TTL-stamped key-value cache persisted as JSON
//!
//! Each cache lives in its own file under `storage/cache/`. Entries carry
//! an `expires_at` stamp; expired entries read as absent and are dropped on
//! the next write.

use chrono::{DateTime, Duration, Utc};
use plinth_core::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    value: Value,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// A single JSON cache file
#[derive(Debug)]
pub struct FileCache {
    path: PathBuf,
    entries: BTreeMap<String, CacheEntry>,
}

impl FileCache {
    /// Open a cache file; a missing or unreadable file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let entries = match fs::read_to_string(&path) {
            Ok(content) => serde_json::from_str(&content).unwrap_or_else(|e| {
                warn!("Discarding unreadable cache {}: {}", path.display(), e);
                BTreeMap::new()
            }),
            Err(_) => BTreeMap::new(),
        };
        Self { path, entries }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Live value for `key`, if present and decodable
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let entry = self.entries.get(key)?;
        if !entry.is_live(Utc::now()) {
            debug!("Cache entry {} expired", key);
            return None;
        }
        serde_json::from_value(entry.value.clone()).ok()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries
            .get(key)
            .is_some_and(|entry| entry.is_live(Utc::now()))
    }

    /// Store a value for `ttl` and write the file
    pub fn put<T: Serialize>(&mut self, key: &str, value: &T, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.is_live(now));
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value: serde_json::to_value(value)?,
                expires_at: now + ttl,
            },
        );
        self.flush()
    }

    pub fn forget(&mut self, key: &str) -> Result<()> {
        if self.entries.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    /// Drop every entry and the file itself
    pub fn clear(&mut self) -> Result<()> {
        self.entries.clear();
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.entries)?)?;
        Ok(())
    }
}
