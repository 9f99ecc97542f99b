//! Version file reader
//!
//! Every extension may carry `updates/version.yaml`, an ordered map of
//! version to change descriptors:
//!
//! ```yaml
//! v1.0.0: First version
//! 1.0.1:
//!   - Adds the posts table
//!   - create_posts_table.php
//! 1.1.0: [Adds categories, updates/create_categories.php]
//! ```
//!
//! Keys lose a leading `v`/`V`, must be unique once normalized, and are
//! sorted by semantic precedence once at load time. Descriptors that look
//! like a script path are executable, everything else is a comment.

use crate::types::{ChangeDescriptor, Extension, UNINSTALLED_VERSION};
use plinth_core::{Error, Result};
use regex::Regex;
use semver::{BuildMetadata, Prerelease, Version};
use serde_yaml_ng::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

/// Location of the version file inside an extension directory
pub const VERSION_FILE: &str = "updates/version.yaml";

/// Directory script descriptors resolve against
pub const UPDATES_DIR: &str = "updates";

static SCRIPT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[a-z0-9_\-./\\]+\.php$").expect("script pattern regex is valid")
});

static VERSION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^([vV]?\d[0-9A-Za-z.\-+]*)[ \t]*:"#).expect("version key regex is valid")
});

/// Classify a single descriptor string
pub fn classify(descriptor: &str) -> ChangeDescriptor {
    let trimmed = descriptor.trim();
    if SCRIPT_PATTERN.is_match(trimmed) {
        ChangeDescriptor::Script(trimmed.to_string())
    } else {
        ChangeDescriptor::Comment(descriptor.to_string())
    }
}

/// Strip a single leading `v`/`V`
pub fn normalize_version(raw: &str) -> &str {
    let raw = raw.trim();
    raw.strip_prefix(['v', 'V']).unwrap_or(raw)
}

/// Parse a version string leniently: missing minor/patch parts become zero,
/// build metadata is dropped so it never affects precedence.
pub fn parse_lenient(raw: &str) -> Option<Version> {
    let normalized = normalize_version(raw);
    let without_build = normalized.split('+').next().unwrap_or(normalized);
    let (core, pre) = match without_build.split_once('-') {
        Some((core, pre)) => (core, Some(pre)),
        None => (without_build, None),
    };

    let parts: Vec<&str> = core.split('.').collect();
    if parts.is_empty() || parts.len() > 3 {
        return None;
    }

    let mut numbers = [0u64; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = part.parse().ok()?;
    }

    let pre = match pre {
        Some(pre) => Prerelease::new(pre).ok()?,
        None => Prerelease::EMPTY,
    };

    Some(Version {
        major: numbers[0],
        minor: numbers[1],
        patch: numbers[2],
        pre,
        build: BuildMetadata::EMPTY,
    })
}

/// Compare two version strings by semantic precedence, falling back to text
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient(a), parse_lenient(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => normalize_version(a).cmp(normalize_version(b)),
    }
}

/// One version and its descriptors, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    pub version: String,
    key: Version,
    pub changes: Vec<ChangeDescriptor>,
}

impl ManifestEntry {
    pub fn comments(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().filter_map(|c| match c {
            ChangeDescriptor::Comment(text) => Some(text.as_str()),
            ChangeDescriptor::Script(_) => None,
        })
    }

    pub fn scripts(&self) -> impl Iterator<Item = &str> {
        self.changes.iter().filter_map(|c| match c {
            ChangeDescriptor::Script(path) => Some(path.as_str()),
            ChangeDescriptor::Comment(_) => None,
        })
    }

    /// First comment, used for one-line progress output
    pub fn summary(&self) -> Option<&str> {
        self.comments().next()
    }
}

/// Sorted version history declared by one extension
#[derive(Debug, Clone, PartialEq)]
pub struct VersionManifest {
    identifier: String,
    updates_dir: PathBuf,
    entries: Vec<ManifestEntry>,
}

impl VersionManifest {
    pub fn empty(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            updates_dir: PathBuf::new(),
            entries: Vec::new(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    pub fn versions(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.version.as_str()).collect()
    }

    pub fn latest(&self) -> Option<&str> {
        self.entries.last().map(|e| e.version.as_str())
    }

    /// Absolute path of a script descriptor
    pub fn script_path(&self, script: &str) -> PathBuf {
        self.updates_dir.join(script)
    }

    /// Index of a version, comparing by precedence
    pub fn position(&self, version: &str) -> Option<usize> {
        if version == UNINSTALLED_VERSION {
            return None;
        }
        let wanted = parse_lenient(version)?;
        self.entries.iter().position(|e| e.key == wanted)
    }

    pub fn contains(&self, version: &str) -> bool {
        self.position(version).is_some()
    }

    /// Entries strictly after `current`. An unknown current version yields
    /// the whole manifest because its position cannot be determined.
    pub fn pending_after(&self, current: &str) -> &[ManifestEntry] {
        match self.position(current) {
            Some(index) => &self.entries[index + 1..],
            None => &self.entries,
        }
    }

    /// Entries at or below `version` by precedence
    pub fn up_to(&self, version: &str) -> Vec<&ManifestEntry> {
        match parse_lenient(version) {
            Some(limit) => self.entries.iter().filter(|e| e.key <= limit).collect(),
            None => Vec::new(),
        }
    }

    /// Parse manifest text. `updates_dir` anchors script paths.
    pub fn parse(identifier: &str, content: &str, updates_dir: PathBuf) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self {
                identifier: identifier.to_string(),
                updates_dir,
                entries: Vec::new(),
            });
        }

        let quoted = quote_version_keys(content);
        let value: Value = serde_yaml_ng::from_str(&quoted)
            .map_err(|e| Error::invalid_manifest(identifier, e.to_string()))?;

        let mapping = match value {
            Value::Mapping(mapping) => mapping,
            Value::Null => Default::default(),
            _ => {
                return Err(Error::invalid_manifest(
                    identifier,
                    "top level must be a map of version to changes",
                ))
            }
        };

        let mut entries: Vec<ManifestEntry> = Vec::with_capacity(mapping.len());
        for (key, detail) in mapping {
            let raw_key = scalar_to_string(&key).ok_or_else(|| {
                Error::invalid_manifest(identifier, format!("unsupported key {:?}", key))
            })?;
            let version = normalize_version(&raw_key).to_string();
            let parsed = parse_lenient(&version).ok_or_else(|| {
                Error::invalid_manifest(identifier, format!("invalid version key '{}'", raw_key))
            })?;

            if let Some(existing) = entries.iter().find(|e| e.key == parsed) {
                return Err(Error::invalid_manifest(
                    identifier,
                    format!(
                        "duplicate version key '{}' (same as '{}')",
                        raw_key, existing.version
                    ),
                ));
            }

            let changes = descriptors_for(identifier, &raw_key, detail)?;
            entries.push(ManifestEntry {
                version,
                key: parsed,
                changes,
            });
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));

        Ok(Self {
            identifier: identifier.to_string(),
            updates_dir,
            entries,
        })
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn descriptors_for(identifier: &str, key: &str, detail: Value) -> Result<Vec<ChangeDescriptor>> {
    match detail {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .map(|item| {
                scalar_to_string(item).map(|s| classify(&s)).ok_or_else(|| {
                    Error::invalid_manifest(
                        identifier,
                        format!("version '{}' contains a non-text descriptor", key),
                    )
                })
            })
            .collect(),
        other => scalar_to_string(&other)
            .map(|s| vec![classify(&s)])
            .ok_or_else(|| {
                Error::invalid_manifest(
                    identifier,
                    format!("version '{}' must be text or a list", key),
                )
            }),
    }
}

/// Quote top-level version keys so `1.0` stays text instead of a float
fn quote_version_keys(content: &str) -> String {
    VERSION_KEY.replace_all(content, "\"${1}\":").into_owned()
}

/// Reads version files with a per-process cache keyed by identifier
#[derive(Debug, Default)]
pub struct VersionFileReader {
    cache: HashMap<String, Arc<VersionManifest>>,
}

impl VersionFileReader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load (or return the cached) manifest of an extension.
    /// A missing file is an empty manifest.
    pub fn load(&mut self, extension: &Extension) -> Result<Arc<VersionManifest>> {
        if let Some(manifest) = self.cache.get(&extension.identifier) {
            return Ok(Arc::clone(manifest));
        }

        let manifest = Arc::new(Self::read(&extension.identifier, &extension.path)?);
        self.cache
            .insert(extension.identifier.clone(), Arc::clone(&manifest));
        Ok(manifest)
    }

    /// Read a manifest from an extension directory without caching
    pub fn read(identifier: &str, extension_dir: &Path) -> Result<VersionManifest> {
        let path = extension_dir.join(VERSION_FILE);
        let updates_dir = extension_dir.join(UPDATES_DIR);

        if !path.exists() {
            tracing::debug!("{} has no version file", identifier);
            return Ok(VersionManifest {
                identifier: identifier.to_string(),
                updates_dir,
                entries: Vec::new(),
            });
        }

        let content = fs::read_to_string(&path)?;
        VersionManifest::parse(identifier, &content, updates_dir)
    }

    pub fn has_version_file(extension: &Extension) -> bool {
        extension.path.join(VERSION_FILE).exists()
    }

    /// Drop one cached manifest
    pub fn forget(&mut self, identifier: &str) {
        self.cache.remove(identifier);
    }

    /// Drop every cached manifest
    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use test_case::test_case;

    fn parse(content: &str) -> Result<VersionManifest> {
        VersionManifest::parse("Acme.Blog", content, PathBuf::from("/ext/updates"))
    }

    #[test_case("b2.php", true ; "bare script")]
    #[test_case("Fixes an issue", false ; "comment")]
    #[test_case("updates/b2.php", true ; "nested script")]
    #[test_case("b2.PHP", true ; "upper case extension")]
    #[test_case("create table.php", false ; "space is not allowed")]
    #[test_case("notes.php.txt", false ; "wrong suffix")]
    fn test_classify(input: &str, is_script: bool) {
        assert_eq!(matches!(classify(input), ChangeDescriptor::Script(_)), is_script);
    }

    #[test]
    fn test_keys_sort_numerically() {
        let manifest = parse(
            "2.0.0: Two\n1.5.0: One and a half\nv1.0.0: One\n10.0.0: Ten\n",
        )
        .unwrap();
        assert_eq!(manifest.versions(), vec!["1.0.0", "1.5.0", "2.0.0", "10.0.0"]);
    }

    #[test]
    fn test_float_like_keys_stay_text() {
        let manifest = parse("1.0: First\n1.10: Tenth\n1.2: Second\n").unwrap();
        assert_eq!(manifest.versions(), vec!["1.0", "1.2", "1.10"]);
    }

    #[test]
    fn test_prerelease_sorts_before_release() {
        let manifest = parse("1.0.0: Final\n1.0.0-beta.1: Beta\n0.9.0: Old\n").unwrap();
        assert_eq!(manifest.versions(), vec!["0.9.0", "1.0.0-beta.1", "1.0.0"]);
    }

    #[test]
    fn test_duplicate_after_normalization() {
        let err = parse("v1.0.0: One\n1.0.0: Again\n").unwrap_err();
        assert!(matches!(err, Error::InvalidManifest { .. }));

        let err = parse("1.0: One\n1.0.0: Again\n").unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_invalid_key() {
        let err = parse("latest: nope\n").unwrap_err();
        assert!(err.to_string().contains("latest"));
    }

    #[test]
    fn test_broken_yaml_names_extension() {
        let err = parse("1.0.0: [unterminated\n").unwrap_err();
        assert!(err.to_string().contains("Acme.Blog"));
    }

    #[test]
    fn test_mixed_entry() {
        let manifest = parse(
            "1.0.0:\n  - Creates tables\n  - create_tables.php\n  - seed.php\n",
        )
        .unwrap();
        let entry = &manifest.entries()[0];
        assert_eq!(entry.comments().collect::<Vec<_>>(), vec!["Creates tables"]);
        assert_eq!(entry.scripts().collect::<Vec<_>>(), vec!["create_tables.php", "seed.php"]);
        assert_eq!(entry.summary(), Some("Creates tables"));
        assert_eq!(
            manifest.script_path("seed.php"),
            PathBuf::from("/ext/updates/seed.php")
        );
    }

    #[test]
    fn test_empty_entry_is_allowed() {
        let manifest = parse("1.0.0:\n1.0.1: Fix\n").unwrap();
        assert!(manifest.entries()[0].changes.is_empty());
    }

    #[test]
    fn test_pending_after() {
        let manifest = parse("1.0.0: a\n1.0.1: b\n1.1.0: c\n").unwrap();
        assert_eq!(manifest.pending_after("0").len(), 3);
        assert_eq!(manifest.pending_after("1.0.0").len(), 2);
        assert_eq!(manifest.pending_after("v1.1.0").len(), 0);
        // retired version: position unknown, everything is pending
        assert_eq!(manifest.pending_after("0.5.0").len(), 3);
    }

    #[test]
    fn test_up_to() {
        let manifest = parse("1.0.0: a\n1.0.1: b\n1.1.0: c\n").unwrap();
        let versions: Vec<_> = manifest.up_to("1.0.1").iter().map(|e| e.version.clone()).collect();
        assert_eq!(versions, vec!["1.0.0", "1.0.1"]);
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = tempfile::TempDir::new().unwrap();
        let manifest = VersionFileReader::read("Acme.Blog", temp.path()).unwrap();
        assert!(manifest.is_empty());
        assert_eq!(manifest.latest(), None);
    }

    #[test]
    fn test_reader_caches_until_forgotten() {
        let temp = tempfile::TempDir::new().unwrap();
        fs::create_dir_all(temp.path().join("updates")).unwrap();
        fs::write(temp.path().join(VERSION_FILE), "1.0.0: First\n").unwrap();

        let ext = Extension::new("Acme.Blog", crate::types::ExtensionKind::Plugin, temp.path());
        let mut reader = VersionFileReader::new();
        assert_eq!(reader.load(&ext).unwrap().latest(), Some("1.0.0"));

        fs::write(temp.path().join(VERSION_FILE), "1.0.0: First\n1.0.1: Second\n").unwrap();
        assert_eq!(reader.load(&ext).unwrap().latest(), Some("1.0.0"));

        reader.forget("Acme.Blog");
        assert_eq!(reader.load(&ext).unwrap().latest(), Some("1.0.1"));
    }

    proptest! {
        #[test]
        fn prop_sorted_by_precedence(parts in proptest::collection::btree_set((0u64..50, 0u64..50, 0u64..50), 1..20)) {
            let content: String = parts
                .iter()
                .rev()
                .map(|(a, b, c)| format!("{}.{}.{}: change\n", a, b, c))
                .collect();
            let manifest = parse(&content).unwrap();
            let expected: Vec<String> = parts
                .iter()
                .map(|(a, b, c)| format!("{}.{}.{}", a, b, c))
                .collect();
            prop_assert_eq!(manifest.versions(), expected);
        }

        #[test]
        fn prop_comments_never_look_like_scripts(text in "[A-Za-z ]{1,40}") {
            prop_assert!(matches!(classify(&text), ChangeDescriptor::Comment(_)));
        }
    }
}
