//! Update checks against the remote catalog
//!
//! The catalog answers `core/update` with the number of available updates
//! and per-plugin and per-theme details. That raw count is adjusted
//! locally before it is stored as `update.count`:
//! - frozen plugins and plugins that cannot be updated are dropped and discounted
//! - themes installed before are dropped; the remaining ones are added
//! - a core update is dropped and discounted when core updates are disabled
//!
//! Discounts floor at zero.

use crate::catalog::CatalogClient;
use crate::coordinator::{AvailableUpdate, ExtensionCoordinator};
use crate::parameters::ParameterStore;
use chrono::{Duration, Utc};
use plinth_core::types::UpdatesConfig;
use plinth_core::Result;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, warn};

/// What this installation reports to the catalog
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstalledState {
    pub core_build: Option<String>,
    pub core_hash: Option<String>,
    /// Installed plugin code to ledger version
    pub plugins: BTreeMap<String, String>,
    pub frozen: BTreeSet<String>,
    pub not_updatable: BTreeSet<String>,
    pub themes: BTreeSet<String>,
}

impl InstalledState {
    pub fn collect(plugins: &ExtensionCoordinator, parameters: &ParameterStore) -> Result<Self> {
        Ok(Self {
            core_build: parameters.core_build(),
            core_hash: parameters.core_hash(),
            plugins: plugins.installed_versions()?,
            frozen: plugins.frozen_codes()?,
            not_updatable: plugins.non_updatable_codes()?,
            themes: parameters.theme_history().into_keys().collect(),
        })
    }

    fn is_theme_installed(&self, code: &str) -> bool {
        self.themes.iter().any(|theme| theme.eq_ignore_ascii_case(code))
    }
}

/// One plugin the catalog has a newer version of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginUpdate {
    /// Catalog package name
    pub name: String,
    /// Installed version, if any
    pub from: Option<String>,
    pub to: String,
    pub hash: Option<String>,
}

/// Adjusted update list
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateList {
    pub core: Option<Value>,
    pub plugins: BTreeMap<String, PluginUpdate>,
    pub themes: BTreeMap<String, Value>,
    pub count: u64,
    pub has_updates: bool,
}

impl UpdateList {
    /// Offered versions keyed by the package reference of the plugin that owns them
    pub fn available_by_package(&self, coordinator: &ExtensionCoordinator) -> BTreeMap<String, AvailableUpdate> {
        self.plugins
            .iter()
            .filter_map(|(code, update)| {
                let package = coordinator.get(code)?.package.clone()?;
                Some((
                    package,
                    AvailableUpdate {
                        from: update.from.clone().unwrap_or_else(|| "0".to_string()),
                        to: update.to.clone(),
                        hash: update.hash.clone(),
                    },
                ))
            })
            .collect()
    }
}

fn str_field<'a>(value: &'a Value, key: &str) -> Option<&'a str> {
    value.get(key).and_then(Value::as_str)
}

/// Apply the local adjustments to a raw `core/update` response
pub fn parse_update_response(
    response: &Value,
    installed: &InstalledState,
    disable_core_updates: bool,
) -> UpdateList {
    let mut count = response.get("update").and_then(Value::as_u64).unwrap_or(0);

    let mut core = response.get("core").filter(|core| !core.is_null()).cloned();
    if let Some(Value::Object(core)) = core.as_mut() {
        core.insert(
            "old_build".to_string(),
            installed.core_build.clone().map(Value::from).unwrap_or(Value::Null),
        );
    }

    let mut plugins = BTreeMap::new();
    if let Some(entries) = response.get("plugins").and_then(Value::as_object) {
        for (code, info) in entries {
            if installed.frozen.contains(code) || installed.not_updatable.contains(code) {
                debug!("Discounting update of {}", code);
                count = count.saturating_sub(1);
                continue;
            }
            plugins.insert(
                code.clone(),
                PluginUpdate {
                    name: str_field(info, "name").unwrap_or(code).to_string(),
                    from: installed.plugins.get(code).cloned(),
                    to: str_field(info, "version").unwrap_or_default().to_string(),
                    hash: str_field(info, "hash").map(str::to_string),
                },
            );
        }
    }

    let themes: BTreeMap<String, Value> = response
        .get("themes")
        .and_then(Value::as_object)
        .map(|entries| {
            entries
                .iter()
                .filter(|(code, _)| !installed.is_theme_installed(code))
                .map(|(code, info)| (code.clone(), info.clone()))
                .collect()
        })
        .unwrap_or_default();

    if core.is_some() && disable_core_updates {
        count = count.saturating_sub(1);
        core = None;
    }

    count += themes.len() as u64;

    UpdateList {
        core,
        plugins,
        themes,
        has_updates: count > 0,
        count,
    }
}

/// Ask the catalog for updates and store the adjusted count
pub fn request_update_list(
    catalog: &CatalogClient,
    parameters: &mut ParameterStore,
    installed: &InstalledState,
    disable_core_updates: bool,
    force: bool,
) -> Result<UpdateList> {
    let mut params = BTreeMap::new();
    params.insert("core".to_string(), installed.core_hash.clone().unwrap_or_default());
    params.insert("plugins".to_string(), serde_json::to_string(&installed.plugins)?);
    params.insert("themes".to_string(), serde_json::to_string(&installed.themes)?);
    params.insert("build".to_string(), installed.core_build.clone().unwrap_or_default());
    params.insert("force".to_string(), if force { "1" } else { "0" }.to_string());

    let response = catalog.update_list(params)?;
    let list = parse_update_response(&response, installed, disable_core_updates);
    parameters.set_update_count(list.count)?;
    Ok(list)
}

/// Rate-limited update count
pub struct UpdateChecker<'a> {
    parameters: &'a mut ParameterStore,
    retry: Duration,
}

impl<'a> UpdateChecker<'a> {
    pub fn new(parameters: &'a mut ParameterStore, config: &UpdatesConfig) -> Self {
        Self {
            parameters,
            retry: Duration::hours(config.retry_hours),
        }
    }

    /// A known positive count is returned as is. Otherwise the catalog is
    /// asked, unless the retry time lies ahead and `force` is off. Request
    /// failures count as zero updates.
    pub fn check(
        &mut self,
        force: bool,
        request: impl FnOnce(&mut ParameterStore) -> Result<UpdateList>,
    ) -> Result<u64> {
        let known = self.parameters.update_count();
        if known > 0 {
            return Ok(known);
        }

        let now = Utc::now();
        if !force
            && self
                .parameters
                .update_retry()
                .is_some_and(|retry| retry > now.timestamp())
        {
            debug!("Update check postponed");
            return Ok(known);
        }

        let count = match request(&mut *self.parameters) {
            Ok(list) => list.count,
            Err(e) => {
                warn!("Update check failed: {}", e);
                0
            }
        };

        self.parameters.set_update_count(count)?;
        self.parameters
            .set_update_retry((now + self.retry).timestamp())?;
        Ok(count)
    }
}
