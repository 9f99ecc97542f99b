//! Extension sources
//!
//! Where an extension's files come from before it is installed:
//! - Local: a directory on disk, copied into the kind's root
//! - Market: downloaded from the remote catalog by code
//!
//! A source moves through three states. `Uninstalled` has no files in the
//! kind's root, `Unpacked` has files but a ledger version of "0", and
//! `Installed` has migrations applied.

use crate::catalog::RESPONSE_INVALID;
use crate::coordinator::{handler, theme_directory_name, ExtensionCoordinator, ExtensionManager, LifecycleReport, Services, UninstallOptions};
use crate::registry::detect_identifier;
use crate::types::{Extension, ExtensionKind, DESCRIPTOR_FILE};
use plinth_core::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceOrigin {
    Local,
    Market,
}

impl fmt::Display for SourceOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceOrigin::Local => write!(f, "local"),
            SourceOrigin::Market => write!(f, "market"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceStatus {
    Uninstalled,
    Unpacked,
    Installed,
}

/// Directory an extension with this code lives in
pub fn guess_path_from_code(kind: ExtensionKind, root: &Path, code: &str) -> PathBuf {
    match kind {
        ExtensionKind::Plugin => code
            .to_lowercase()
            .split('.')
            .fold(root.to_path_buf(), |path, part| path.join(part)),
        ExtensionKind::Theme => root.join(theme_directory_name(code)),
        ExtensionKind::Module => root.join(code.to_lowercase()),
    }
}

/// Identifier of the extension in `path`: its declared identifier if the
/// descriptor has one, otherwise derived from the directory layout
pub fn guess_code_from_path(kind: ExtensionKind, root: &Path, path: &Path) -> Option<String> {
    if let Some(code) = detect_identifier(path) {
        return Some(code);
    }

    match kind {
        ExtensionKind::Plugin => {
            let relative = path.strip_prefix(root).ok()?;
            let parts: Vec<&str> = relative
                .components()
                .filter_map(|c| c.as_os_str().to_str())
                .collect();
            (parts.len() == 2).then(|| parts.join("."))
        }
        ExtensionKind::Theme | ExtensionKind::Module => path
            .file_name()
            .and_then(|name| name.to_str())
            .map(str::to_string),
    }
}

/// An extension to install, from disk or from the catalog
#[derive(Debug, Clone)]
pub struct ExtensionSource {
    kind: ExtensionKind,
    origin: SourceOrigin,
    code: String,
    path: Option<PathBuf>,
}

impl ExtensionSource {
    /// Source for a directory on disk
    pub fn local(kind: ExtensionKind, root: &Path, path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.join(DESCRIPTOR_FILE).is_file() {
            return Err(Error::invalid_operation(format!(
                "{} has no {}",
                path.display(),
                DESCRIPTOR_FILE
            )));
        }
        let code = guess_code_from_path(kind, root, &path).ok_or_else(|| {
            Error::invalid_operation(format!("Cannot determine the identifier of {}", path.display()))
        })?;

        Ok(Self {
            kind,
            origin: SourceOrigin::Local,
            code,
            path: Some(path),
        })
    }

    /// Source downloaded from the catalog; plugins and themes only
    pub fn market(kind: ExtensionKind, code: impl Into<String>) -> Result<Self> {
        if handler(kind).detail.is_none() {
            return Err(Error::unsupported(kind.as_str(), "market install"));
        }
        Ok(Self {
            kind,
            origin: SourceOrigin::Market,
            code: code.into(),
            path: None,
        })
    }

    pub fn kind(&self) -> ExtensionKind {
        self.kind
    }

    pub fn origin(&self) -> SourceOrigin {
        self.origin
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn status(&self, coordinator: &mut ExtensionCoordinator) -> Result<SourceStatus> {
        if coordinator.is_installed(&self.code)? {
            return Ok(SourceStatus::Installed);
        }

        let unpacked = coordinator.get(&self.code).is_some()
            || guess_path_from_code(self.kind, coordinator.root(), &self.code)
                .join(DESCRIPTOR_FILE)
                .is_file();
        Ok(if unpacked {
            SourceStatus::Unpacked
        } else {
            SourceStatus::Uninstalled
        })
    }

    /// Put the extension's files in place; afterwards the source is local
    pub fn create_files(&mut self, coordinator: &ExtensionCoordinator, services: &mut Services) -> Result<PathBuf> {
        let destination = match self.origin {
            SourceOrigin::Market => self.download(coordinator.root(), services)?,
            SourceOrigin::Local => {
                let source = self.path.clone().ok_or_else(|| {
                    Error::invalid_operation(format!("No files to install for {}", self.code))
                })?;
                let destination = guess_path_from_code(self.kind, coordinator.root(), &self.code);
                if source != destination {
                    if destination.exists() {
                        return Err(Error::invalid_operation(format!(
                            "{} already exists",
                            destination.display()
                        )));
                    }
                    copy_dir(&source, &destination)?;
                }
                destination
            }
        };

        info!("Unpacked {} to {}", self.code, destination.display());
        self.origin = SourceOrigin::Local;
        self.path = Some(destination.clone());
        Ok(destination)
    }

    fn download(&mut self, root: &Path, services: &mut Services) -> Result<PathBuf> {
        let handler = handler(self.kind);
        let (Some(request), Some(download)) = (handler.detail, handler.download) else {
            return Err(Error::unsupported(self.kind.as_str(), "market install"));
        };
        let catalog = services
            .catalog
            .as_ref()
            .ok_or_else(|| Error::remote_catalog("No catalog is configured"))?;

        let detail = catalog.request(request, &self.code)?;
        let hash = detail
            .get("hash")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::remote_catalog(RESPONSE_INVALID))?
            .to_string();
        if let Some(code) = detail.get("code").and_then(Value::as_str) {
            self.code = code.to_string();
        }

        download(catalog, &self.code, &hash)?;
        catalog.extract(&self.code, &hash, root, services.archiver.as_ref())?;
        Ok(guess_path_from_code(self.kind, root, &self.code))
    }

    /// Unpack if needed, then install through the coordinator
    pub fn install(&mut self, coordinator: &mut ExtensionCoordinator, services: &mut Services) -> Result<Extension> {
        match self.status(coordinator)? {
            SourceStatus::Installed => {}
            SourceStatus::Uninstalled => {
                self.create_files(coordinator, services)?;
                coordinator.install(services, &self.code)?;
            }
            SourceStatus::Unpacked => {
                coordinator.install(services, &self.code)?;
            }
        }

        coordinator
            .get(&self.code)
            .cloned()
            .ok_or_else(|| Error::unknown_extension(&self.code))
    }

    pub fn uninstall(
        &self,
        coordinator: &mut ExtensionCoordinator,
        services: &mut Services,
        options: UninstallOptions,
    ) -> Result<LifecycleReport> {
        if self.status(coordinator)? != SourceStatus::Installed {
            return Err(Error::invalid_operation(format!("{} is not installed", self.code)));
        }
        coordinator.uninstall(services, &self.code, options)
    }
}

fn copy_dir(source: &Path, destination: &Path) -> Result<()> {
    for entry in WalkDir::new(source) {
        let entry = entry.map_err(std::io::Error::from)?;
        let Ok(relative) = entry.path().strip_prefix(source) else {
            continue;
        };
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
