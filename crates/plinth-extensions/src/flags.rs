//! Disable flags and replacement state
//!
//! An extension is disabled while it carries any flag. Each reason is a
//! distinct flag and clearing one leaves the others in place.
//!
//! The computed state is memoized in a [`FileCache`] under a key derived
//! from the loaded identifiers and the configured disable list, so it is
//! regenerated whenever either changes.

use crate::cache::FileCache;
use crate::registry::ExtensionRegistry;
use crate::types::Extension;
use chrono::Duration;
use plinth_core::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

/// Reason an extension is disabled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DisableFlag {
    #[serde(rename = "disabled-missing")]
    Missing,
    #[serde(rename = "disabled-replaced")]
    Replaced,
    #[serde(rename = "disabled-replacement-failed")]
    ReplacementFailed,
    #[serde(rename = "disabled-dependencies")]
    MissingDependencies,
    #[serde(rename = "disabled-request")]
    Request,
    #[default]
    #[serde(rename = "disabled-user")]
    ByUser,
    #[serde(rename = "disabled-config")]
    ByConfig,
}

impl DisableFlag {
    pub const ALL: [DisableFlag; 7] = [
        Self::Missing,
        Self::Replaced,
        Self::ReplacementFailed,
        Self::MissingDependencies,
        Self::Request,
        Self::ByUser,
        Self::ByConfig,
    ];

    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "disabled-missing",
            Self::Replaced => "disabled-replaced",
            Self::ReplacementFailed => "disabled-replacement-failed",
            Self::MissingDependencies => "disabled-dependencies",
            Self::Request => "disabled-request",
            Self::ByUser => "disabled-user",
            Self::ByConfig => "disabled-config",
        }
    }
}

impl fmt::Display for DisableFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DisableFlag {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|flag| flag.as_str() == s)
            .ok_or_else(|| format!("unknown disable flag '{}'", s))
    }
}

/// Flags plus the replacement maps derived alongside them.
/// Flag keys are lower-case identifiers.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlagState {
    flags: BTreeMap<String, BTreeSet<DisableFlag>>,
    /// Replaced identifier to replacing identifier, for replacements that took effect
    /// or whose replaced extension is absent
    replacements: BTreeMap<String, String>,
    /// Replaced identifier to replacing identifier, where both are present
    active_replacements: BTreeMap<String, String>,
}

impl FlagState {
    pub fn flag(&mut self, identifier: &str, flag: DisableFlag) {
        self.flags
            .entry(identifier.to_ascii_lowercase())
            .or_default()
            .insert(flag);
    }

    /// Clear one flag; the entry disappears with its last flag
    pub fn unflag(&mut self, identifier: &str, flag: DisableFlag) {
        let key = identifier.to_ascii_lowercase();
        if let Some(flags) = self.flags.get_mut(&key) {
            flags.remove(&flag);
            if flags.is_empty() {
                self.flags.remove(&key);
            }
        }
    }

    pub fn is_disabled(&self, identifier: &str) -> bool {
        self.flags
            .get(&identifier.to_ascii_lowercase())
            .is_some_and(|flags| !flags.is_empty())
    }

    pub fn flags_of(&self, identifier: &str) -> Vec<DisableFlag> {
        self.flags
            .get(&identifier.to_ascii_lowercase())
            .map(|flags| flags.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn has_flag(&self, identifier: &str, flag: DisableFlag) -> bool {
        self.flags
            .get(&identifier.to_ascii_lowercase())
            .is_some_and(|flags| flags.contains(&flag))
    }

    pub fn replacements(&self) -> &BTreeMap<String, String> {
        &self.replacements
    }

    pub fn active_replacements(&self) -> &BTreeMap<String, String> {
        &self.active_replacements
    }

    /// Replacement currently standing in for `replaced`, if both are present
    pub fn active_replacement_for(&self, replaced: &str) -> Option<&str> {
        self.active_replacements
            .iter()
            .find(|(target, _)| target.eq_ignore_ascii_case(replaced))
            .map(|(_, replacement)| replacement.as_str())
    }

    /// Derive the full flag set from scratch.
    ///
    /// Order: configured disable list, persisted user disables, missing
    /// dependencies, then replacement detection. `installed_version` gives
    /// the version a replaced extension is judged at.
    pub fn compute(
        registry: &ExtensionRegistry,
        config_disabled: &[String],
        user_disabled: &[String],
        installed_version: impl Fn(&Extension) -> String,
    ) -> Self {
        let mut state = Self::default();

        for code in config_disabled {
            state.flag(code, DisableFlag::ByConfig);
        }
        for code in user_disabled {
            state.flag(code, DisableFlag::ByUser);
        }

        state.replacements = registry.declared_replacements();

        let missing = registry.find_missing_dependencies(&state.replacements);
        for extension in registry.extensions() {
            if missing.contains_key(&extension.identifier) {
                state.flag(&extension.identifier, DisableFlag::MissingDependencies);
            } else {
                state.unflag(&extension.identifier, DisableFlag::MissingDependencies);
            }
        }

        state.detect_replacements(registry, installed_version);
        state
    }

    fn detect_replacements(
        &mut self,
        registry: &ExtensionRegistry,
        installed_version: impl Fn(&Extension) -> String,
    ) {
        let declared: Vec<(String, String)> = self
            .replacements
            .iter()
            .map(|(t, r)| (t.clone(), r.clone()))
            .collect();

        for (target, replacement) in declared {
            let Some(target_ext) = registry.get(&target) else {
                continue;
            };
            let Some(replacement_ext) = registry.get(&replacement) else {
                continue;
            };

            if replacement_ext.can_replace(&target, &installed_version(target_ext)) {
                self.flag(&target, DisableFlag::Replaced);
                self.unflag(&replacement, DisableFlag::ReplacementFailed);
                self.active_replacements.insert(target, replacement);
            } else {
                debug!("{} cannot replace {} at its installed version", replacement, target);
                self.flag(&replacement, DisableFlag::ReplacementFailed);
                self.unflag(&target, DisableFlag::Replaced);
                self.replacements.remove(&target);
            }
        }
    }
}

/// Cache key for a loaded set of extensions and a configured disable list
pub fn flag_cache_key(loaded: &[String], config_disabled: &[String]) -> String {
    let mut loaded: Vec<&str> = loaded.iter().map(String::as_str).collect();
    loaded.sort_unstable();

    let mut hasher = Sha256::new();
    hasher.update(loaded.join(".").as_bytes());
    hasher.update(b"|");
    hasher.update(config_disabled.join(".").as_bytes());
    format!("flags.{:x}", hasher.finalize())
}

/// Flag state with its cache
pub struct FlagStore {
    cache: FileCache,
    key: String,
    ttl: Duration,
    state: FlagState,
}

impl FlagStore {
    /// Load the state stored under `key`, regenerating it when absent
    pub fn load(
        cache: FileCache,
        key: String,
        ttl: Duration,
        regenerate: impl FnOnce() -> Result<FlagState>,
    ) -> Result<Self> {
        let mut store = Self {
            cache,
            key,
            ttl,
            state: FlagState::default(),
        };

        match store.cache.get::<FlagState>(&store.key) {
            Some(state) => {
                debug!("Loaded flag state from cache");
                store.state = state;
            }
            None => {
                debug!("Regenerating flag state");
                store.state = regenerate()?;
                store.cache.put(&store.key, &store.state, store.ttl)?;
            }
        }

        Ok(store)
    }

    pub fn state(&self) -> &FlagState {
        &self.state
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_disabled(&self, identifier: &str) -> bool {
        self.state.is_disabled(identifier)
    }

    /// Set a flag in memory; the cached copy is left alone
    pub fn flag(&mut self, identifier: &str, flag: DisableFlag) {
        self.state.flag(identifier, flag);
    }

    pub fn unflag(&mut self, identifier: &str, flag: DisableFlag) {
        self.state.unflag(identifier, flag);
    }

    /// Forget the cached state so the next load regenerates it
    pub fn clear(&mut self) -> Result<()> {
        self.cache.forget(&self.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtensionKind;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn plugin(id: &str) -> Extension {
        Extension::new(id, ExtensionKind::Plugin, PathBuf::from("/p").join(id))
    }

    #[test]
    fn test_flags_are_independent() {
        let mut state = FlagState::default();
        state.flag("Acme.Blog", DisableFlag::ByUser);
        state.flag("Acme.Blog", DisableFlag::MissingDependencies);

        state.unflag("Acme.Blog", DisableFlag::ByUser);
        assert!(state.is_disabled("Acme.Blog"));
        assert_eq!(state.flags_of("acme.blog"), vec![DisableFlag::MissingDependencies]);

        state.unflag("Acme.Blog", DisableFlag::MissingDependencies);
        assert!(!state.is_disabled("Acme.Blog"));
    }

    #[test]
    fn test_wire_names() {
        assert_eq!(DisableFlag::ByUser.to_string(), "disabled-user");
        assert_eq!(
            "disabled-dependencies".parse::<DisableFlag>().unwrap(),
            DisableFlag::MissingDependencies
        );
        assert!("disabled-maybe".parse::<DisableFlag>().is_err());
        assert_eq!(
            serde_json::to_string(&DisableFlag::ReplacementFailed).unwrap(),
            "\"disabled-replacement-failed\""
        );
    }

    #[test]
    fn test_compute_missing_and_config() {
        let mut shop = plugin("Acme.Shop");
        shop.requires = vec!["Acme.Payments".to_string()];
        let registry = ExtensionRegistry::from_extensions(ExtensionKind::Plugin, vec![shop, plugin("Acme.Blog")]);

        let state = FlagState::compute(&registry, &["Acme.Blog".to_string()], &[], |_| "1.0.0".to_string());
        assert!(state.has_flag("Acme.Shop", DisableFlag::MissingDependencies));
        assert!(state.has_flag("Acme.Blog", DisableFlag::ByConfig));
    }

    #[test]
    fn test_replacement_detection() {
        let mut replacement = plugin("Acme.Blog");
        replacement
            .replaces
            .insert("Legacy.Blog".to_string(), Some(semver::VersionReq::parse("<2.0").unwrap()));
        let registry =
            ExtensionRegistry::from_extensions(ExtensionKind::Plugin, vec![replacement, plugin("Legacy.Blog")]);

        let state = FlagState::compute(&registry, &[], &[], |_| "1.4.0".to_string());
        assert!(state.has_flag("Legacy.Blog", DisableFlag::Replaced));
        assert!(!state.is_disabled("Acme.Blog"));
        assert_eq!(state.active_replacement_for("legacy.blog"), Some("Acme.Blog"));

        let state = FlagState::compute(&registry, &[], &[], |_| "2.1.0".to_string());
        assert!(state.has_flag("Acme.Blog", DisableFlag::ReplacementFailed));
        assert!(!state.is_disabled("Legacy.Blog"));
        assert!(state.replacements().is_empty());
    }

    #[test]
    fn test_cache_key_tracks_inputs() {
        let a = flag_cache_key(&["B".into(), "A".into()], &[]);
        let b = flag_cache_key(&["A".into(), "B".into()], &[]);
        let c = flag_cache_key(&["A".into(), "B".into()], &["A".into()]);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_store_uses_cache_until_cleared() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("flags.json");
        let key = "flags.test".to_string();

        let mut regenerated = 0;
        let load = |count: &mut i32| {
            FlagStore::load(FileCache::open(&path), key.clone(), Duration::days(30), || {
                *count += 1;
                let mut state = FlagState::default();
                state.flag("Acme.Blog", DisableFlag::ByUser);
                Ok(state)
            })
            .unwrap()
        };

        let store = load(&mut regenerated);
        assert!(store.is_disabled("Acme.Blog"));
        let mut store = load(&mut regenerated);
        assert_eq!(regenerated, 1);

        store.clear().unwrap();
        load(&mut regenerated);
        assert_eq!(regenerated, 2);
    }
}
