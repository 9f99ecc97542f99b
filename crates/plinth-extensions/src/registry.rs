//! Extension registry
//!
//! Discovers extensions of one kind from their root directory, keeps a
//! case-insensitive identifier map and orders extensions by their
//! `requires` lists.
//!
//! Layout on disk:
//! - plugins: `<plugins-dir>/<vendor>/<name>/extension.yaml`
//! - themes: `<themes-dir>/<name>/extension.yaml`
//! - modules: `<modules-dir>/<name>/extension.yaml`

use crate::types::{Extension, ExtensionDescriptor, ExtensionKind, DESCRIPTOR_FILE};
use plinth_core::utils::namespace_to_identifier;
use plinth_core::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Ordering passes allowed per extension before giving up
const PASSES_PER_EXTENSION: usize = 4;

/// Extensions of one kind, keyed by canonical identifier
#[derive(Debug, Clone)]
pub struct ExtensionRegistry {
    kind: ExtensionKind,
    extensions: BTreeMap<String, Extension>,
    /// Lower-case identifier to canonical identifier
    normalized: HashMap<String, String>,
}

impl ExtensionRegistry {
    pub fn new(kind: ExtensionKind) -> Self {
        Self {
            kind,
            extensions: BTreeMap::new(),
            normalized: HashMap::new(),
        }
    }

    /// Build a registry from already-loaded extensions
    pub fn from_extensions(kind: ExtensionKind, extensions: impl IntoIterator<Item = Extension>) -> Self {
        let mut registry = Self::new(kind);
        for extension in extensions {
            registry.insert(extension);
        }
        registry
    }

    /// Scan `root` for extensions. Candidates whose descriptor cannot be
    /// read or parsed are skipped with a warning. `allowed` limits module
    /// discovery to the configured module names.
    pub fn discover(kind: ExtensionKind, root: &Path, allowed: Option<&[String]>) -> Result<Self> {
        let mut registry = Self::new(kind);

        if !root.exists() {
            debug!("{} root {} does not exist", kind, root.display());
            return Ok(registry);
        }

        let depth = match kind {
            ExtensionKind::Plugin => 3,
            ExtensionKind::Theme | ExtensionKind::Module => 2,
        };

        for entry in WalkDir::new(root)
            .min_depth(depth)
            .max_depth(depth)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file() && e.file_name() == DESCRIPTOR_FILE)
        {
            let Some(dir) = entry.path().parent() else {
                continue;
            };

            if let Some(allowed) = allowed {
                let name = dir.file_name().and_then(|n| n.to_str()).unwrap_or_default();
                if !allowed.iter().any(|a| a.eq_ignore_ascii_case(name)) {
                    debug!("Skipping module {} (not in load-modules)", name);
                    continue;
                }
            }

            match load_extension(kind, root, dir) {
                Ok(extension) => {
                    if let Some(existing) = registry.get(&extension.identifier) {
                        warn!(
                            "Skipping {}: identifier {} already provided by {}",
                            dir.display(),
                            extension.identifier,
                            existing.path.display()
                        );
                        continue;
                    }
                    registry.insert(extension);
                }
                Err(reason) => warn!("Skipping {}: {}", dir.display(), reason),
            }
        }

        info!("Discovered {} {}", registry.len(), kind.plural());
        Ok(registry)
    }

    fn insert(&mut self, extension: Extension) {
        self.normalized.insert(
            extension.identifier.to_ascii_lowercase(),
            extension.identifier.clone(),
        );
        self.extensions.insert(extension.identifier.clone(), extension);
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.extensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Canonical spelling of an identifier
    pub fn normalize(&self, identifier: &str) -> Option<&str> {
        self.normalized
            .get(&identifier.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn get(&self, identifier: &str) -> Option<&Extension> {
        self.normalize(identifier)
            .and_then(|canonical| self.extensions.get(canonical))
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.normalize(identifier).is_some()
    }

    /// Extensions sorted by identifier
    pub fn extensions(&self) -> impl Iterator<Item = &Extension> {
        self.extensions.values()
    }

    pub fn identifiers(&self) -> Vec<String> {
        self.extensions.keys().cloned().collect()
    }

    /// Declared supersessions: replaced identifier to replacing identifier
    pub fn declared_replacements(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        for extension in self.extensions.values() {
            for target in extension.replaces.keys() {
                map.insert(target.clone(), extension.identifier.clone());
            }
        }
        map
    }

    /// `requires` of an extension with superseded identifiers substituted
    pub fn dependencies(&self, extension: &Extension, replacements: &BTreeMap<String, String>) -> Vec<String> {
        extension
            .requires
            .iter()
            .map(|required| resolve_replacement(required, replacements))
            .collect()
    }

    /// Required identifiers that are not present, keyed by the requiring extension
    pub fn find_missing_dependencies(
        &self,
        replacements: &BTreeMap<String, String>,
    ) -> BTreeMap<String, Vec<String>> {
        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for extension in self.extensions.values() {
            for required in self.dependencies(extension, replacements) {
                if self.contains(&required) {
                    continue;
                }
                let entry = missing.entry(extension.identifier.clone()).or_default();
                if !entry.contains(&required) {
                    entry.push(required);
                }
            }
        }
        missing
    }

    /// Identifiers ordered so every extension follows the ones it requires.
    ///
    /// Each pass moves every extension whose present dependencies are all
    /// ordered. Requirements on extensions that are not present are ignored
    /// here. A pass without progress, or running out of passes, is a cycle.
    pub fn topological_order(&self, replacements: &BTreeMap<String, String>) -> Result<Vec<String>> {
        let mut pending: Vec<(&str, Vec<String>)> = self
            .extensions
            .values()
            .map(|extension| {
                let depends = self
                    .dependencies(extension, replacements)
                    .into_iter()
                    .filter_map(|d| self.normalize(&d).map(str::to_string))
                    .filter(|d| d != &extension.identifier)
                    .collect();
                (extension.identifier.as_str(), depends)
            })
            .collect();

        let bound = self.extensions.len().max(1) * PASSES_PER_EXTENSION;
        let mut ordered: Vec<String> = Vec::with_capacity(pending.len());
        let mut passes = 0;

        while !pending.is_empty() {
            passes += 1;
            let before = pending.len();

            let mut index = 0;
            while index < pending.len() {
                let ready = pending[index].1.iter().all(|d| ordered.contains(d));
                if ready {
                    let (code, _) = pending.remove(index);
                    ordered.push(code.to_string());
                } else {
                    index += 1;
                }
            }

            if pending.len() == before || (passes >= bound && !pending.is_empty()) {
                let unresolved: Vec<String> = pending.iter().map(|(code, _)| code.to_string()).collect();
                return Err(Error::circular_dependency(bound, &unresolved));
            }
        }

        Ok(ordered)
    }
}

/// Follow the supersession map; resolving twice returns the same identifier
pub fn resolve_replacement(identifier: &str, replacements: &BTreeMap<String, String>) -> String {
    replacements
        .iter()
        .find(|(target, _)| target.eq_ignore_ascii_case(identifier))
        .map(|(_, replacement)| replacement.clone())
        .unwrap_or_else(|| identifier.to_string())
}

/// Read and validate one extension directory
fn load_extension(kind: ExtensionKind, root: &Path, dir: &Path) -> std::result::Result<Extension, String> {
    let path = dir.join(DESCRIPTOR_FILE);
    let content = fs::read_to_string(&path).map_err(|e| format!("cannot read {}: {}", DESCRIPTOR_FILE, e))?;
    let descriptor: ExtensionDescriptor = if content.trim().is_empty() {
        ExtensionDescriptor::default()
    } else {
        serde_yaml_ng::from_str(&content).map_err(|e| format!("invalid {}: {}", DESCRIPTOR_FILE, e))?
    };

    let identifier = descriptor
        .declared_identifier()
        .or_else(|| identifier_from_path(kind, root, dir))
        .ok_or_else(|| "no identifier declared".to_string())?;

    Extension::from_descriptor(identifier, kind, dir.to_path_buf(), descriptor)
}

/// `Vendor.Name` for plugins, the directory name otherwise
fn identifier_from_path(kind: ExtensionKind, root: &Path, dir: &Path) -> Option<String> {
    let relative = dir.strip_prefix(root).ok()?;
    let parts: Vec<&str> = relative
        .components()
        .filter_map(|c| c.as_os_str().to_str())
        .collect();

    match (kind, parts.as_slice()) {
        (ExtensionKind::Plugin, [vendor, name]) => Some(format!("{}.{}", vendor, name)),
        (ExtensionKind::Theme | ExtensionKind::Module, [name]) => Some(name.to_string()),
        _ => None,
    }
}

/// Find the identifier of an extension directory outside the configured
/// roots by scanning its descriptor line by line. Nothing is parsed or
/// executed; only `identifier:` and `namespace:` lines are read.
pub fn detect_identifier(dir: &Path) -> Option<String> {
    let content = fs::read_to_string(dir.join(DESCRIPTOR_FILE)).ok()?;

    let mut namespace = None;
    for line in content.lines() {
        if line.starts_with([' ', '\t']) {
            continue;
        }
        if let Some(value) = line.strip_prefix("identifier:") {
            let value = unquote(value);
            if !value.is_empty() {
                return Some(value.to_string());
            }
        } else if let Some(value) = line.strip_prefix("namespace:") {
            let value = unquote(value);
            if !value.is_empty() {
                namespace = Some(namespace_to_identifier(&value.replace("\\\\", "\\")));
            }
        }
    }
    namespace
}

fn unquote(value: &str) -> &str {
    let value = value.split(" #").next().unwrap_or(value).trim();
    value
        .strip_prefix(['"', '\''])
        .and_then(|v| v.strip_suffix(['"', '\'']))
        .unwrap_or(value)
}
