//! Hierarchical configuration loader with precedence
//!
//! Loads configuration from multiple sources with the following precedence (low to high):
//! 1. Embedded defaults (built into binary)
//! 2. User config (~/.plinth/plinth.yaml, or an explicit `--config` path)
//! 3. Environment variables (PLINTH_* prefix)
//!
//! Files are merged key by key, so a user file only needs the keys it changes.

use crate::error::{Error, Result};
use crate::types::PlinthConfig;
use camino::{Utf8Path, Utf8PathBuf};
use rust_embed::RustEmbed;
use serde_yaml_ng::Value;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Embedded configuration files
#[derive(RustEmbed)]
#[folder = "$CARGO_MANIFEST_DIR/../../embedded/config/"]
#[prefix = ""]
struct EmbeddedConfigs;

const DEFAULTS_FILE: &str = "plinth-defaults.yaml";
const USER_CONFIG_FILE: &str = "plinth.yaml";

/// Configuration hierarchy loader
pub struct HierarchicalConfigLoader {
    /// Base directory for configuration files
    config_dir: Utf8PathBuf,
}

impl HierarchicalConfigLoader {
    /// Create a new hierarchical config loader rooted at ~/.plinth
    pub fn new() -> Result<Self> {
        let config_dir = Self::get_config_dir()?;
        Ok(Self { config_dir })
    }

    /// Create a loader with a custom config directory
    pub fn with_dir(config_dir: Utf8PathBuf) -> Self {
        Self { config_dir }
    }

    /// Get the standard config directory (~/.plinth)
    fn get_config_dir() -> Result<Utf8PathBuf> {
        let home = crate::utils::get_home_dir()
            .map_err(|e| Error::invalid_config(e.to_string()))?;
        let home = Utf8PathBuf::from_path_buf(home)
            .map_err(|p| Error::invalid_config(format!("Home directory is not UTF-8: {}", p.display())))?;
        Ok(home.join(".plinth"))
    }

    /// Load configuration from the user config file in the config directory
    pub fn load(&self) -> Result<PlinthConfig> {
        let path = self.config_dir.join(USER_CONFIG_FILE);
        self.load_layers(path.exists().then_some(path.as_path()))
    }

    /// Load configuration using an explicit file instead of the user config
    pub fn load_from(&self, path: &Utf8Path) -> Result<PlinthConfig> {
        if !path.exists() {
            return Err(Error::config_not_found(path.as_str()));
        }
        self.load_layers(Some(path))
    }

    fn load_layers(&self, file: Option<&Utf8Path>) -> Result<PlinthConfig> {
        let mut merged = Self::load_embedded_value(DEFAULTS_FILE)?;

        if let Some(path) = file {
            tracing::debug!("Loading configuration from {}", path);
            let overlay = Self::load_yaml_value(path)?;
            merge_values(&mut merged, overlay);
        }

        let config: PlinthConfig = serde_yaml_ng::from_value(merged)
            .map_err(|e| Error::invalid_config(format!("Failed to parse configuration: {}", e)))?;

        self.apply_env_overrides(config)
    }

    /// Load an embedded configuration file as a raw YAML tree
    fn load_embedded_value(filename: &str) -> Result<Value> {
        let embedded_file = EmbeddedConfigs::get(filename).ok_or_else(|| {
            Error::config_not_found(format!("Embedded config not found: {}", filename))
        })?;

        let content = std::str::from_utf8(&embedded_file.data).map_err(|_| {
            Error::invalid_config(format!("Invalid UTF-8 in embedded config: {}", filename))
        })?;

        serde_yaml_ng::from_str(content).map_err(|e| {
            Error::invalid_config(format!(
                "Failed to parse embedded config {}: {}",
                filename, e
            ))
        })
    }

    /// Load a YAML file as a raw YAML tree
    fn load_yaml_value(path: &Utf8Path) -> Result<Value> {
        let content = fs::read_to_string(path)?;
        if content.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_yaml_ng::from_str(&content)
            .map_err(|e| Error::invalid_config(format!("Failed to parse {}: {}", path, e)))
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&self, mut config: PlinthConfig) -> Result<PlinthConfig> {
        if let Ok(val) = env::var("PLINTH_BASE_DIR") {
            config.paths.base_dir = PathBuf::from(val);
        }

        if let Ok(val) = env::var("PLINTH_SERVER_URL") {
            config.catalog.server_url = val;
        }

        if let Ok(val) = env::var("PLINTH_CATALOG_KEY") {
            config.catalog.key = Some(val);
        }

        if let Ok(val) = env::var("PLINTH_CATALOG_SECRET") {
            config.catalog.secret = Some(val);
        }

        if let Ok(val) = env::var("PLINTH_HTTP_TIMEOUT_SECS") {
            config.catalog.timeout_secs = val.parse().map_err(|_| {
                Error::invalid_config("PLINTH_HTTP_TIMEOUT_SECS must be a valid number")
            })?;
        }

        if let Ok(val) = env::var("PLINTH_RESTRICTED_MODE") {
            config.extensions.restricted_mode = val.parse().map_err(|_| {
                Error::invalid_config("PLINTH_RESTRICTED_MODE must be true or false")
            })?;
        }

        if let Ok(val) = env::var("PLINTH_DISABLE_CORE_UPDATES") {
            config.extensions.disable_core_updates = val.parse().map_err(|_| {
                Error::invalid_config("PLINTH_DISABLE_CORE_UPDATES must be true or false")
            })?;
        }

        if let Ok(val) = env::var("PLINTH_RUNNER_INTERPRETER") {
            config.runner.interpreter = val;
        }

        Ok(config)
    }

    /// Get the config directory path
    pub fn config_dir(&self) -> &Utf8Path {
        &self.config_dir
    }
}

/// Merge `overlay` into `base`; mappings merge per key, everything else replaces
fn merge_values(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}
