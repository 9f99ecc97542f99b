//! Configuration types for plinth
//!
//! These types describe where extensions live, which of them are loaded
//! or disabled by configuration, and how the remote catalog, update
//! checker and migration runner behave.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Complete plinth configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PlinthConfig {
    /// Filesystem layout
    #[serde(default)]
    pub paths: PathsConfig,

    /// Extension loading and gating
    #[serde(default)]
    pub extensions: ExtensionsConfig,

    /// Remote catalog settings
    #[serde(default)]
    pub catalog: CatalogConfig,

    /// Update check policy
    #[serde(default)]
    pub updates: UpdatesConfig,

    /// Migration script runner
    #[serde(default)]
    pub runner: RunnerConfig,
}

/// Filesystem layout. Relative entries resolve against `base-dir`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PathsConfig {
    #[serde(default = "default_base_dir")]
    pub base_dir: PathBuf,

    #[serde(default = "default_plugins_dir")]
    pub plugins_dir: PathBuf,

    #[serde(default = "default_themes_dir")]
    pub themes_dir: PathBuf,

    #[serde(default = "default_modules_dir")]
    pub modules_dir: PathBuf,

    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            base_dir: default_base_dir(),
            plugins_dir: default_plugins_dir(),
            themes_dir: default_themes_dir(),
            modules_dir: default_modules_dir(),
            storage_dir: default_storage_dir(),
        }
    }
}

impl PathsConfig {
    /// Layout rooted at `base_dir` with the default sub-directories
    pub fn rooted_at(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            ..Self::default()
        }
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    pub fn plugins(&self) -> PathBuf {
        self.resolve(&self.plugins_dir)
    }

    pub fn themes(&self) -> PathBuf {
        self.resolve(&self.themes_dir)
    }

    pub fn modules(&self) -> PathBuf {
        self.resolve(&self.modules_dir)
    }

    pub fn storage(&self) -> PathBuf {
        self.resolve(&self.storage_dir)
    }

    /// Directory for downloaded archives
    pub fn temp(&self) -> PathBuf {
        self.storage().join("temp")
    }
}

fn default_base_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_plugins_dir() -> PathBuf {
    PathBuf::from("plugins")
}
fn default_themes_dir() -> PathBuf {
    PathBuf::from("themes")
}
fn default_modules_dir() -> PathBuf {
    PathBuf::from("modules")
}
fn default_storage_dir() -> PathBuf {
    PathBuf::from("storage")
}

/// Extension loading and gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ExtensionsConfig {
    /// Core modules to load, in order
    #[serde(default)]
    pub load_modules: Vec<String>,

    /// Plugins disabled by configuration
    #[serde(default)]
    pub disable_plugins: Vec<String>,

    /// Only elevated extensions boot while set
    #[serde(default)]
    pub restricted_mode: bool,

    /// Skip remote core updates and discount them from the update count
    #[serde(default)]
    pub disable_core_updates: bool,

    /// Theme that may not be uninstalled
    #[serde(default)]
    pub active_theme: Option<String>,

    /// Upper bound on the age of the cached disable-flag set
    #[serde(default = "default_flag_cache_ttl_days")]
    pub flag_cache_ttl_days: i64,
}

impl Default for ExtensionsConfig {
    fn default() -> Self {
        Self {
            load_modules: Vec::new(),
            disable_plugins: Vec::new(),
            restricted_mode: false,
            disable_core_updates: false,
            active_theme: None,
            flag_cache_ttl_days: default_flag_cache_ttl_days(),
        }
    }
}

fn default_flag_cache_ttl_days() -> i64 {
    30
}

/// Remote catalog settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CatalogConfig {
    /// Gateway URL every request path is appended to
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// API key sent as `Rest-Key`
    #[serde(default)]
    pub key: Option<String>,

    /// Base64-encoded API secret used for request signing
    #[serde(default)]
    pub secret: Option<String>,

    /// Request pre-release builds
    #[serde(default)]
    pub edge_updates: bool,

    /// HTTP timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_product_cache_ttl_hours")]
    pub product_cache_ttl_hours: i64,

    #[serde(default = "default_popular_cache_ttl_minutes")]
    pub popular_cache_ttl_minutes: i64,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            key: None,
            secret: None,
            edge_updates: false,
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            product_cache_ttl_hours: default_product_cache_ttl_hours(),
            popular_cache_ttl_minutes: default_popular_cache_ttl_minutes(),
        }
    }
}

impl CatalogConfig {
    /// Key and secret, when both are configured
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (self.key.as_deref(), self.secret.as_deref()) {
            (Some(key), Some(secret)) if !key.is_empty() && !secret.is_empty() => {
                Some((key, secret))
            }
            _ => None,
        }
    }
}

fn default_server_url() -> String {
    "https://catalog.plinth.dev/marketplace".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_user_agent() -> String {
    format!(
        "plinth/{} ({}; {})",
        env!("CARGO_PKG_VERSION"),
        std::env::consts::OS,
        std::env::consts::ARCH
    )
}
fn default_product_cache_ttl_hours() -> i64 {
    48
}
fn default_popular_cache_ttl_minutes() -> i64 {
    60
}

/// Update check policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UpdatesConfig {
    /// Hours to wait before asking the catalog again
    #[serde(default = "default_retry_hours")]
    pub retry_hours: i64,
}

impl Default for UpdatesConfig {
    fn default() -> Self {
        Self {
            retry_hours: default_retry_hours(),
        }
    }
}

fn default_retry_hours() -> i64 {
    24
}

/// Migration script runner
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunnerConfig {
    /// Program that executes a script file
    #[serde(default = "default_interpreter")]
    pub interpreter: String,

    /// Arguments placed before the script path
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            interpreter: default_interpreter(),
            args: Vec::new(),
        }
    }
}

fn default_interpreter() -> String {
    "php".to_string()
}
