//! Per-kind behaviour table

use super::{ExtensionCoordinator, LifecycleReport, Services};
use crate::catalog::{CatalogClient, CatalogRequest};
use crate::types::ExtensionKind;
use plinth_core::Result;
use std::path::PathBuf;

/// Installs an already unpacked extension
pub type InstallFn = fn(&mut ExtensionCoordinator, &mut Services, &str) -> Result<LifecycleReport>;

/// Downloads an artifact by name and hash
pub type DownloadFn = fn(&CatalogClient, &str, &str) -> Result<PathBuf>;

/// What a kind supports and how it installs and downloads
pub struct KindHandler {
    pub kind: ExtensionKind,
    /// Accepts enable/disable
    pub toggles: bool,
    /// Can be scaffolded with `create`
    pub scaffolds: bool,
    /// Uninstall removes the directory
    pub deletes_files: bool,
    pub install: InstallFn,
    /// Catalog detail request for market sources
    pub detail: Option<CatalogRequest>,
    pub download: Option<DownloadFn>,
}

static PLUGIN: KindHandler = KindHandler {
    kind: ExtensionKind::Plugin,
    toggles: true,
    scaffolds: true,
    deletes_files: true,
    install: install_plugin,
    detail: Some(CatalogRequest::PluginDetail),
    download: Some(download_plugin),
};

static THEME: KindHandler = KindHandler {
    kind: ExtensionKind::Theme,
    toggles: true,
    scaffolds: true,
    deletes_files: true,
    install: install_theme,
    detail: Some(CatalogRequest::ThemeDetail),
    download: Some(download_theme),
};

static MODULE: KindHandler = KindHandler {
    kind: ExtensionKind::Module,
    toggles: false,
    scaffolds: false,
    deletes_files: false,
    install: install_module,
    detail: None,
    download: None,
};

pub fn handler(kind: ExtensionKind) -> &'static KindHandler {
    match kind {
        ExtensionKind::Plugin => &PLUGIN,
        ExtensionKind::Theme => &THEME,
        ExtensionKind::Module => &MODULE,
    }
}

/// Reload, then apply every migration
fn install_plugin(
    coordinator: &mut ExtensionCoordinator,
    _services: &mut Services,
    identifier: &str,
) -> Result<LifecycleReport> {
    coordinator.reload()?;
    coordinator.migrate(identifier)
}

/// Remember the theme directory, then apply its migrations
fn install_theme(
    coordinator: &mut ExtensionCoordinator,
    services: &mut Services,
    identifier: &str,
) -> Result<LifecycleReport> {
    coordinator.reload()?;
    let code = coordinator.resolve(identifier)?;
    services
        .parameters
        .record_theme(&code, &theme_directory_name(&code))?;
    coordinator.migrate(&code)
}

fn install_module(
    coordinator: &mut ExtensionCoordinator,
    services: &mut Services,
    identifier: &str,
) -> Result<LifecycleReport> {
    coordinator.reload()?;
    coordinator.refresh_one(services, identifier)
}

fn download_plugin(client: &CatalogClient, name: &str, hash: &str) -> Result<PathBuf> {
    client.download_plugin(name, hash, false)
}

fn download_theme(client: &CatalogClient, name: &str, hash: &str) -> Result<PathBuf> {
    client.download_theme(name, hash)
}

/// `Acme.Dark` is kept as `acme-dark`
pub fn theme_directory_name(code: &str) -> String {
    code.replace('.', "-").to_lowercase()
}
