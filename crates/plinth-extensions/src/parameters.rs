//! System parameter store
//!
//! Small JSON key-value file (`parameters.json`) for values that outlive a
//! single run: core build info, the cached update count and retry time,
//! installed theme directories and the linked catalog project.

use plinth_core::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const CORE_BUILD: &str = "core.build";
pub const CORE_HASH: &str = "core.hash";
pub const UPDATE_COUNT: &str = "update.count";
pub const UPDATE_RETRY: &str = "update.retry";
pub const THEME_HISTORY: &str = "theme.history";
pub const PROJECT_ID: &str = "project.id";
pub const PROJECT_NAME: &str = "project.name";
pub const PROJECT_OWNER: &str = "project.owner";

/// Catalog project this installation is linked to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectLink {
    pub id: String,
    pub name: String,
    pub owner: String,
}

/// Key-value parameters persisted as one JSON object
#[derive(Debug)]
pub struct ParameterStore {
    path: PathBuf,
    values: Map<String, Value>,
}

impl ParameterStore {
    /// Open the store; a missing file starts empty
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let values = if path.exists() {
            let content = fs::read_to_string(&path)?;
            if content.trim().is_empty() {
                Map::new()
            } else {
                serde_json::from_str(&content)?
            }
        } else {
            Map::new()
        };
        Ok(Self { path, values })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.values
            .get(key)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn set<T: Serialize>(&mut self, key: &str, value: T) -> Result<()> {
        self.values
            .insert(key.to_string(), serde_json::to_value(value)?);
        self.save()
    }

    pub fn remove(&mut self, key: &str) -> Result<()> {
        if self.values.remove(key).is_some() {
            self.save()?;
        }
        Ok(())
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(&self.values)?)?;
        Ok(())
    }

    pub fn core_build(&self) -> Option<String> {
        self.get(CORE_BUILD)
    }

    pub fn core_hash(&self) -> Option<String> {
        self.get(CORE_HASH)
    }

    pub fn set_core_build(&mut self, build: &str, hash: &str) -> Result<()> {
        self.values.insert(CORE_BUILD.into(), Value::from(build));
        self.values.insert(CORE_HASH.into(), Value::from(hash));
        self.save()
    }

    pub fn update_count(&self) -> u64 {
        self.get(UPDATE_COUNT).unwrap_or(0)
    }

    pub fn set_update_count(&mut self, count: u64) -> Result<()> {
        self.set(UPDATE_COUNT, count)
    }

    /// Unix timestamp before which no automatic update check runs
    pub fn update_retry(&self) -> Option<i64> {
        self.get(UPDATE_RETRY)
    }

    pub fn set_update_retry(&mut self, timestamp: i64) -> Result<()> {
        self.set(UPDATE_RETRY, timestamp)
    }

    /// Installed theme identifier to theme directory name
    pub fn theme_history(&self) -> BTreeMap<String, String> {
        self.get(THEME_HISTORY).unwrap_or_default()
    }

    pub fn record_theme(&mut self, code: &str, dir_name: &str) -> Result<()> {
        let mut history = self.theme_history();
        history.insert(code.to_string(), dir_name.to_string());
        self.set(THEME_HISTORY, history)
    }

    pub fn forget_theme(&mut self, code: &str) -> Result<()> {
        let mut history = self.theme_history();
        if history.remove(code).is_some() {
            self.set(THEME_HISTORY, history)?;
        }
        Ok(())
    }

    pub fn project(&self) -> Option<ProjectLink> {
        Some(ProjectLink {
            id: self.get(PROJECT_ID)?,
            name: self.get(PROJECT_NAME).unwrap_or_default(),
            owner: self.get(PROJECT_OWNER).unwrap_or_default(),
        })
    }

    pub fn set_project(&mut self, project: &ProjectLink) -> Result<()> {
        self.values.insert(PROJECT_ID.into(), Value::from(project.id.as_str()));
        self.values.insert(PROJECT_NAME.into(), Value::from(project.name.as_str()));
        self.values.insert(PROJECT_OWNER.into(), Value::from(project.owner.as_str()));
        self.save()
    }

    pub fn clear_project(&mut self) -> Result<()> {
        for key in [PROJECT_ID, PROJECT_NAME, PROJECT_OWNER] {
            self.values.remove(key);
        }
        self.save()
    }
}
