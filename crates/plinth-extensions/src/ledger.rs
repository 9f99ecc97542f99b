//! Migration ledger
//!
//! Durable record of which version each extension is at and which history
//! units (comments and scripts) were applied to get there. Storage is
//! pluggable through [`LedgerStore`]; [`MigrationLedger`] adds the
//! per-process version cache and the operations the migration engine needs.

use crate::types::{HistoryEntry, HistoryKind, LedgerRecord, UNINSTALLED_VERSION};
use crate::version_file::compare_versions;
use anyhow::Context;
use chrono::Utc;
use fs4::fs_std::FileExt;
use plinth_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::{Path, PathBuf};

/// Both logical tables of the ledger
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LedgerData {
    #[serde(default)]
    pub versions: Vec<LedgerRecord>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    #[serde(default)]
    pub next_id: u64,
}

impl LedgerData {
    fn record_mut(&mut self, code: &str) -> Option<&mut LedgerRecord> {
        self.versions.iter_mut().find(|r| r.code == code)
    }

    fn record_or_default(&mut self, code: &str) -> &mut LedgerRecord {
        if let Some(index) = self.versions.iter().position(|r| r.code == code) {
            return &mut self.versions[index];
        }
        self.versions.push(LedgerRecord {
            code: code.to_string(),
            version: UNINSTALLED_VERSION.to_string(),
            is_disabled: false,
            is_frozen: false,
            created_at: Utc::now(),
        });
        let last = self.versions.len() - 1;
        &mut self.versions[last]
    }
}

/// Persistence backend for ledger tables
pub trait LedgerStore {
    /// Read both tables; missing storage reads as empty
    fn load(&self) -> Result<LedgerData>;

    /// Replace both tables
    fn save(&mut self, data: &LedgerData) -> Result<()>;

    /// Remove the underlying storage structure entirely
    fn drop_storage(&mut self) -> Result<()>;
}

/// JSON document on disk, written under an exclusive lock via temp file and rename
pub struct FileLedgerStore {
    path: PathBuf,
}

impl FileLedgerStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        self.path.with_extension("lock")
    }

    fn open_lock(&self) -> anyhow::Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).context("Failed to create ledger directory")?;
        }
        OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())
            .context("Failed to open ledger lock file")
    }

    fn read(&self) -> anyhow::Result<LedgerData> {
        if !self.path.exists() {
            return Ok(LedgerData::default());
        }

        let lock = self.open_lock()?;
        FileExt::lock_shared(&lock).context("Failed to acquire shared lock on ledger")?;

        let file = File::open(&self.path).context("Failed to open ledger file")?;
        let data = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to parse ledger {}", self.path.display()))?;
        Ok(data)
    }

    fn write(&self, data: &LedgerData) -> anyhow::Result<()> {
        let lock = self.open_lock()?;
        lock.lock_exclusive()
            .context("Failed to acquire exclusive lock on ledger")?;

        let parent = self
            .path
            .parent()
            .context("Ledger path has no parent directory")?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary ledger file")?;
        let json = serde_json::to_string_pretty(data).context("Failed to serialize ledger")?;
        temp.write_all(json.as_bytes())
            .context("Failed to write temporary ledger file")?;
        temp.as_file()
            .sync_all()
            .context("Failed to sync temporary ledger file")?;
        temp.persist(&self.path)
            .context("Failed to replace ledger file")?;

        // lock released when `lock` is dropped
        Ok(())
    }
}

impl LedgerStore for FileLedgerStore {
    fn load(&self) -> Result<LedgerData> {
        self.read().map_err(|e| Error::storage(format!("{:#}", e)))
    }

    fn save(&mut self, data: &LedgerData) -> Result<()> {
        self.write(data).map_err(|e| Error::storage(format!("{:#}", e)))
    }

    fn drop_storage(&mut self) -> Result<()> {
        for path in [self.path.clone(), self.lock_path()] {
            if path.exists() {
                fs::remove_file(&path)?;
            }
        }
        tracing::info!("Dropped ledger storage at {}", self.path.display());
        Ok(())
    }
}

/// In-memory store for tests and dry runs
#[derive(Debug, Default)]
pub struct MemoryLedgerStore {
    data: Option<LedgerData>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dropped(&self) -> bool {
        self.data.is_none()
    }
}

impl LedgerStore for MemoryLedgerStore {
    fn load(&self) -> Result<LedgerData> {
        Ok(self.data.clone().unwrap_or_default())
    }

    fn save(&mut self, data: &LedgerData) -> Result<()> {
        self.data = Some(data.clone());
        Ok(())
    }

    fn drop_storage(&mut self) -> Result<()> {
        self.data = None;
        Ok(())
    }
}

/// Ledger operations with a per-process version cache
pub struct MigrationLedger {
    store: Box<dyn LedgerStore>,
    version_cache: HashMap<String, String>,
}

impl MigrationLedger {
    pub fn new(store: Box<dyn LedgerStore>) -> Self {
        Self {
            store,
            version_cache: HashMap::new(),
        }
    }

    /// Ledger backed by a JSON file
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self::new(Box::new(FileLedgerStore::new(path)))
    }

    /// Ledger that lives only in memory
    pub fn in_memory() -> Self {
        Self::new(Box::new(MemoryLedgerStore::new()))
    }

    fn mutate<T>(&mut self, f: impl FnOnce(&mut LedgerData) -> T) -> Result<T> {
        let mut data = self.store.load()?;
        let out = f(&mut data);
        self.store.save(&data)?;
        Ok(out)
    }

    /// Current version, `"0"` when no record exists
    pub fn get_version(&mut self, code: &str) -> Result<String> {
        if let Some(version) = self.version_cache.get(code) {
            return Ok(version.clone());
        }

        let version = self
            .store
            .load()?
            .versions
            .into_iter()
            .find(|r| r.code == code)
            .map(|r| r.version)
            .unwrap_or_else(|| UNINSTALLED_VERSION.to_string());

        self.version_cache.insert(code.to_string(), version.clone());
        Ok(version)
    }

    /// Insert, update or (with `None`) delete the version record.
    /// Setting the same version again still refreshes the timestamp.
    pub fn set_version(&mut self, code: &str, version: Option<&str>) -> Result<()> {
        self.version_cache.remove(code);

        self.mutate(|data| {
            let existing = data.versions.iter().position(|r| r.code == code);
            match (version, existing) {
                (None, Some(index)) => {
                    data.versions.remove(index);
                }
                (None, None) => {}
                (Some(version), Some(index)) => {
                    let record = &mut data.versions[index];
                    record.version = version.to_string();
                    record.created_at = Utc::now();
                }
                (Some(version), None) => {
                    data.versions.push(LedgerRecord {
                        code: code.to_string(),
                        version: version.to_string(),
                        is_disabled: false,
                        is_frozen: false,
                        created_at: Utc::now(),
                    });
                }
            }
        })?;

        tracing::debug!(
            "Ledger version of {} set to {}",
            code,
            version.unwrap_or("<removed>")
        );
        Ok(())
    }

    /// Append one history row; insertion order is preserved
    pub fn append_history(
        &mut self,
        code: &str,
        kind: HistoryKind,
        version: &str,
        detail: &str,
    ) -> Result<HistoryEntry> {
        self.mutate(|data| {
            data.next_id += 1;
            let entry = HistoryEntry {
                id: data.next_id,
                code: code.to_string(),
                kind,
                version: version.to_string(),
                detail: detail.to_string(),
                created_at: Utc::now(),
            };
            data.history.push(entry.clone());
            entry
        })
    }

    /// Comment rows exist for `version` (no script given), or the given script row exists
    pub fn has_history(&self, code: &str, version: &str, script: Option<&str>) -> Result<bool> {
        let data = self.store.load()?;
        Ok(data.history.iter().any(|h| {
            h.code == code
                && h.version == version
                && match script {
                    None => h.kind == HistoryKind::Comment,
                    Some(script) => h.kind == HistoryKind::Script && h.detail == script,
                }
        }))
    }

    /// History rows of one extension in application order
    pub fn history(&self, code: &str) -> Result<Vec<HistoryEntry>> {
        let mut rows: Vec<HistoryEntry> = self
            .store
            .load()?
            .history
            .into_iter()
            .filter(|h| h.code == code)
            .collect();
        rows.sort_by_key(|h| h.id);
        Ok(rows)
    }

    pub fn delete_history_entry(&mut self, id: u64) -> Result<()> {
        self.mutate(|data| data.history.retain(|h| h.id != id))
    }

    /// Delete every history row of one extension, keeping its version record
    pub fn clear_history(&mut self, code: &str) -> Result<usize> {
        self.mutate(|data| {
            let before = data.history.len();
            data.history.retain(|h| h.code != code);
            before - data.history.len()
        })
    }

    /// Any history row carries this version
    pub fn has_version(&self, code: &str, version: &str) -> Result<bool> {
        Ok(self
            .history(code)?
            .iter()
            .any(|h| compare_versions(&h.version, version) == Ordering::Equal))
    }

    /// Detail of the most recent comment row
    pub fn current_note(&self, code: &str) -> Result<Option<String>> {
        Ok(self
            .history(code)?
            .into_iter()
            .rev()
            .find(|h| h.kind == HistoryKind::Comment)
            .map(|h| h.detail))
    }

    /// Delete version and history rows; reports whether anything existed
    pub fn purge(&mut self, code: &str) -> Result<bool> {
        self.version_cache.remove(code);
        let removed = self.mutate(|data| {
            let before = data.versions.len() + data.history.len();
            data.versions.retain(|r| r.code != code);
            data.history.retain(|h| h.code != code);
            before - (data.versions.len() + data.history.len())
        })?;

        if removed > 0 {
            tracing::info!("Purged {} ledger rows for {}", removed, code);
        }
        Ok(removed > 0)
    }

    pub fn record(&self, code: &str) -> Result<Option<LedgerRecord>> {
        Ok(self
            .store
            .load()?
            .versions
            .into_iter()
            .find(|r| r.code == code))
    }

    pub fn records(&self) -> Result<Vec<LedgerRecord>> {
        Ok(self.store.load()?.versions)
    }

    pub fn set_frozen(&mut self, code: &str, frozen: bool) -> Result<()> {
        self.mutate(|data| data.record_or_default(code).is_frozen = frozen)
    }

    pub fn set_disabled(&mut self, code: &str, disabled: bool) -> Result<()> {
        self.mutate(|data| data.record_or_default(code).is_disabled = disabled)
    }

    /// Identifiers whose record is marked disabled
    pub fn disabled_codes(&self) -> Result<Vec<String>> {
        Ok(self
            .records()?
            .into_iter()
            .filter(|r| r.is_disabled)
            .map(|r| r.code)
            .collect())
    }

    /// Move the version record of `from` to `to`
    pub fn rename_code(&mut self, from: &str, to: &str) -> Result<()> {
        self.version_cache.remove(from);
        self.version_cache.remove(to);
        self.mutate(|data| {
            data.versions.retain(|r| r.code != to);
            if let Some(record) = data.record_mut(from) {
                record.code = to.to_string();
            }
        })
    }

    /// Drop the underlying storage structure
    pub fn drop_storage(&mut self) -> Result<()> {
        self.version_cache.clear();
        self.store.drop_storage()
    }

    /// Forget every cached version
    pub fn clear_cache(&mut self) {
        self.version_cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn create_test_ledger() -> (MigrationLedger, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let ledger = MigrationLedger::open(temp_dir.path().join("ledger").join("plugins.json"));
        (ledger, temp_dir)
    }

    #[test]
    fn test_missing_record_reads_zero() {
        let (mut ledger, _temp) = create_test_ledger();
        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "0");
    }

    #[test]
    fn test_set_version_three_way() {
        let (mut ledger, _temp) = create_test_ledger();

        ledger.set_version("Acme.Blog", Some("1.0.0")).unwrap();
        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "1.0.0");

        ledger.set_version("Acme.Blog", Some("1.0.1")).unwrap();
        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "1.0.1");
        assert_eq!(ledger.records().unwrap().len(), 1);

        ledger.set_version("Acme.Blog", None).unwrap();
        assert!(ledger.record("Acme.Blog").unwrap().is_none());
        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "0");
    }

    #[test]
    fn test_same_version_refreshes_timestamp() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger.set_version("Acme.Blog", Some("1.0.0")).unwrap();
        let first = ledger.record("Acme.Blog").unwrap().unwrap().created_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        ledger.set_version("Acme.Blog", Some("1.0.0")).unwrap();
        let second = ledger.record("Acme.Blog").unwrap().unwrap().created_at;

        assert!(second > first);
    }

    #[test]
    fn test_history_keeps_insertion_order() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Script, "1.0.0", "create.php")
            .unwrap();
        ledger
            .append_history("Other.Plugin", HistoryKind::Comment, "1.0.0", "Unrelated")
            .unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.1.0", "Second")
            .unwrap();

        let details: Vec<_> = ledger
            .history("Acme.Blog")
            .unwrap()
            .into_iter()
            .map(|h| h.detail)
            .collect();
        assert_eq!(details, vec!["First", "create.php", "Second"]);
    }

    #[test]
    fn test_has_history() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger
            .append_history("Acme.Blog", HistoryKind::Script, "1.0.0", "create.php")
            .unwrap();

        assert!(!ledger.has_history("Acme.Blog", "1.0.0", None).unwrap());
        assert!(ledger
            .has_history("Acme.Blog", "1.0.0", Some("create.php"))
            .unwrap());
        assert!(!ledger
            .has_history("Acme.Blog", "1.0.0", Some("seed.php"))
            .unwrap());

        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();
        assert!(ledger.has_history("Acme.Blog", "1.0.0", None).unwrap());
    }

    #[test]
    fn test_purge_reports_outcome() {
        let (mut ledger, _temp) = create_test_ledger();
        assert!(!ledger.purge("Acme.Blog").unwrap());

        ledger.set_version("Acme.Blog", Some("1.0.0")).unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();
        assert!(ledger.purge("Acme.Blog").unwrap());
        assert!(ledger.history("Acme.Blog").unwrap().is_empty());
        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "0");
    }

    #[test]
    fn test_current_note_is_last_comment() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.1", "Second")
            .unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Script, "1.0.1", "seed.php")
            .unwrap();

        assert_eq!(
            ledger.current_note("Acme.Blog").unwrap().as_deref(),
            Some("Second")
        );
        assert!(ledger.has_version("Acme.Blog", "1.0.1").unwrap());
        assert!(!ledger.has_version("Acme.Blog", "2.0.0").unwrap());
    }

    #[test]
    fn test_has_version_compares_leniently() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();

        assert!(ledger.has_version("Acme.Blog", "1.0").unwrap());
        assert!(ledger.has_version("Acme.Blog", "v1.0.0").unwrap());
        assert!(!ledger.has_version("Acme.Blog", "1.0.1").unwrap());
    }

    #[test]
    fn test_flags_create_record() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger.set_disabled("Acme.Blog", true).unwrap();
        ledger.set_frozen("Acme.Blog", true).unwrap();

        let record = ledger.record("Acme.Blog").unwrap().unwrap();
        assert!(record.is_disabled);
        assert!(record.is_frozen);
        assert_eq!(record.version, "0");
        assert_eq!(ledger.disabled_codes().unwrap(), vec!["Acme.Blog"]);
    }

    #[test]
    fn test_rename_code() {
        let (mut ledger, _temp) = create_test_ledger();
        ledger.set_version("Legacy.Blog", Some("1.2.0")).unwrap();
        ledger.rename_code("Legacy.Blog", "Acme.Blog").unwrap();

        assert_eq!(ledger.get_version("Acme.Blog").unwrap(), "1.2.0");
        assert_eq!(ledger.get_version("Legacy.Blog").unwrap(), "0");
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plugins.json");

        let mut ledger = MigrationLedger::open(&path);
        ledger.set_version("Acme.Blog", Some("1.0.0")).unwrap();
        ledger
            .append_history("Acme.Blog", HistoryKind::Comment, "1.0.0", "First")
            .unwrap();

        let mut reopened = MigrationLedger::open(&path);
        assert_eq!(reopened.get_version("Acme.Blog").unwrap(), "1.0.0");
        assert_eq!(reopened.history("Acme.Blog").unwrap().len(), 1);
    }

    #[test]
    fn test_drop_storage_removes_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("modules.json");

        let mut ledger = MigrationLedger::open(&path);
        ledger.set_version("Cms", Some("1.0.0")).unwrap();
        assert!(path.exists());

        ledger.drop_storage().unwrap();
        assert!(!path.exists());
        assert_eq!(ledger.get_version("Cms").unwrap(), "0");
    }

    #[test]
    fn test_corrupt_file_is_storage_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("plugins.json");
        fs::write(&path, "{ not json").unwrap();

        let mut ledger = MigrationLedger::open(&path);
        assert!(matches!(
            ledger.get_version("Acme.Blog"),
            Err(Error::Storage { .. })
        ));
    }

    #[test]
    fn test_memory_store_drop() {
        let mut store = MemoryLedgerStore::new();
        store.save(&LedgerData::default()).unwrap();
        assert!(!store.is_dropped());
        store.drop_storage().unwrap();
        assert!(store.is_dropped());
    }
}
