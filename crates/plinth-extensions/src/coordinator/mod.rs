//! Extension lifecycle coordination
//!
//! One [`ExtensionCoordinator`] per extension kind composes the registry,
//! the migration engine and the flag store into the public operations
//! (install, update, rollback, uninstall and friends). Behaviour that
//! differs per kind is looked up in a fixed [`KindHandler`] table instead
//! of being spread over separate manager types.
//!
//! Collaborators shared by all kinds (parameters, catalog, archiver) live
//! in [`Services`] and are passed explicitly to the operations that need
//! them.

mod handlers;
mod manager;
mod teardown;

pub use handlers::{handler, theme_directory_name, KindHandler};
pub use manager::{ledger_path, ExtensionCoordinator, CACHE_DIR, LEDGER_DIR};
pub use teardown::{tear_down_system, TEARDOWN_ORDER};

use crate::archive::{ArchiveExtractor, TarGzArchiver};
use crate::catalog::CatalogClient;
use crate::flags::DisableFlag;
use crate::parameters::ParameterStore;
use crate::types::ExtensionKind;
use plinth_core::types::PlinthConfig;
use plinth_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Parameter file name under the storage directory
pub const PARAMETERS_FILE: &str = "parameters.json";

/// Collaborators shared by every coordinator
pub struct Services {
    pub parameters: ParameterStore,
    /// Absent when no catalog is reachable or configured
    pub catalog: Option<CatalogClient>,
    pub archiver: Box<dyn ArchiveExtractor>,
    pub storage_dir: PathBuf,
}

impl Services {
    pub fn new(
        parameters: ParameterStore,
        catalog: Option<CatalogClient>,
        archiver: Box<dyn ArchiveExtractor>,
        storage_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            parameters,
            catalog,
            archiver,
            storage_dir: storage_dir.into(),
        }
    }

    /// Services for a configured installation: HTTP catalog, tar.gz archives
    pub fn from_config(config: &PlinthConfig) -> Result<Self> {
        let storage_dir = config.paths.storage();
        let parameters = ParameterStore::open(storage_dir.join(PARAMETERS_FILE))?;
        let project = parameters.project().map(|p| p.id);
        let catalog = CatalogClient::http(&config.catalog, &storage_dir)?.with_project(project);

        Ok(Self::new(
            parameters,
            Some(catalog),
            Box::new(TarGzArchiver),
            storage_dir,
        ))
    }
}

/// Remote version available for a package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailableUpdate {
    pub from: String,
    pub to: String,
    /// Artifact hash, needed to download the new version
    #[serde(default)]
    pub hash: Option<String>,
}

/// An extension and its state as shown by `list`
#[derive(Debug, Clone, PartialEq)]
pub struct ExtensionStatus {
    pub identifier: String,
    pub kind: ExtensionKind,
    pub version: String,
    pub flags: Vec<DisableFlag>,
    pub is_frozen: bool,
    pub path: PathBuf,
}

impl ExtensionStatus {
    pub fn is_disabled(&self) -> bool {
        !self.flags.is_empty()
    }
}

/// Uninstall switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UninstallOptions {
    /// Keep the ledger history
    pub no_rollback: bool,
    /// Keep the extension directory
    pub preserve_files: bool,
}

/// One extension that failed inside a batch
#[derive(Debug)]
pub struct ExtensionFailure {
    pub identifier: String,
    pub error: Error,
}

/// Messages of a lifecycle operation plus the failures a batch collected
#[derive(Debug, Default)]
pub struct LifecycleReport {
    pub messages: Vec<String>,
    pub failures: Vec<ExtensionFailure>,
}

impl LifecycleReport {
    pub fn note(&mut self, message: impl Into<String>) {
        self.messages.push(message.into());
    }

    pub fn fail(&mut self, identifier: impl Into<String>, error: Error) {
        self.failures.push(ExtensionFailure {
            identifier: identifier.into(),
            error,
        });
    }

    pub fn merge(&mut self, other: LifecycleReport) {
        self.messages.extend(other.messages);
        self.failures.extend(other.failures);
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The fixed operation set every kind offers
pub trait ExtensionManager {
    fn kind(&self) -> ExtensionKind;

    fn list(&mut self, include_disabled: bool) -> Result<Vec<ExtensionStatus>>;

    fn install(&mut self, services: &mut Services, identifier: &str) -> Result<LifecycleReport>;

    fn enable(&mut self, identifier: &str, flag: DisableFlag) -> Result<()>;

    fn disable(&mut self, identifier: &str, flag: DisableFlag) -> Result<()>;

    fn update(
        &mut self,
        services: &mut Services,
        identifier: Option<&str>,
        migrations_only: bool,
    ) -> Result<LifecycleReport>;

    fn refresh(&mut self, services: &mut Services, identifier: Option<&str>) -> Result<LifecycleReport>;

    fn rollback(&mut self, identifier: Option<&str>, target: Option<&str>) -> Result<LifecycleReport>;

    fn uninstall(
        &mut self,
        services: &mut Services,
        identifier: &str,
        options: UninstallOptions,
    ) -> Result<LifecycleReport>;

    fn tear_down(&mut self, services: &mut Services) -> Result<LifecycleReport>;

    fn available_updates(&self, identifier: Option<&str>) -> BTreeMap<String, AvailableUpdate>;

    fn warnings(&self) -> Vec<String>;
}
