//! Site fixtures
//!
//! A [`TestSite`] is a temporary installation: plugin, theme and module
//! roots plus a storage directory, with builders that write extension
//! directories into it.

#![allow(dead_code)]

use super::mocks::RecordingRunner;
use plinth_core::types::{ExtensionsConfig, PathsConfig, PlinthConfig};
use plinth_extensions::archive::TarGzArchiver;
use plinth_extensions::coordinator::{ledger_path, ExtensionCoordinator, Services, PARAMETERS_FILE};
use plinth_extensions::ledger::MigrationLedger;
use plinth_extensions::parameters::ParameterStore;
use plinth_extensions::source::guess_path_from_code;
use plinth_extensions::types::{Extension, ExtensionKind, DESCRIPTOR_FILE};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary installation
pub struct TestSite {
    temp_dir: TempDir,
    pub config: PlinthConfig,
}

impl TestSite {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let config = PlinthConfig {
            paths: PathsConfig::rooted_at(temp_dir.path()),
            extensions: ExtensionsConfig {
                load_modules: vec!["system".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        Self { temp_dir, config }
    }

    pub fn root(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn storage(&self) -> PathBuf {
        self.config.paths.storage()
    }

    pub fn kind_root(&self, kind: ExtensionKind) -> PathBuf {
        match kind {
            ExtensionKind::Plugin => self.config.paths.plugins(),
            ExtensionKind::Theme => self.config.paths.themes(),
            ExtensionKind::Module => self.config.paths.modules(),
        }
    }

    pub fn plugin(&self, identifier: &str) -> ExtensionBuilder {
        ExtensionBuilder::new(self, ExtensionKind::Plugin, identifier)
    }

    pub fn theme(&self, identifier: &str) -> ExtensionBuilder {
        ExtensionBuilder::new(self, ExtensionKind::Theme, identifier)
    }

    pub fn module(&self, identifier: &str) -> ExtensionBuilder {
        ExtensionBuilder::new(self, ExtensionKind::Module, identifier)
    }

    /// Coordinator over the site's file ledger
    pub fn coordinator(&self, kind: ExtensionKind, runner: &RecordingRunner) -> ExtensionCoordinator {
        let ledger = MigrationLedger::open(ledger_path(kind, &self.storage()));
        ExtensionCoordinator::new(kind, &self.config, ledger, Box::new(runner.clone()))
            .expect("Failed to open coordinator")
    }

    /// Parameters on disk, no catalog
    pub fn services(&self) -> Services {
        let parameters = ParameterStore::open(self.storage().join(PARAMETERS_FILE))
            .expect("Failed to open parameters");
        Services::new(parameters, None, Box::new(TarGzArchiver), self.storage())
    }
}

/// Writes one extension directory
pub struct ExtensionBuilder {
    kind: ExtensionKind,
    identifier: String,
    dir: PathBuf,
    descriptor: Vec<String>,
    manifest: Option<String>,
    scripts: Vec<String>,
}

impl ExtensionBuilder {
    fn new(site: &TestSite, kind: ExtensionKind, identifier: &str) -> Self {
        Self {
            kind,
            identifier: identifier.to_string(),
            dir: guess_path_from_code(kind, &site.kind_root(kind), identifier),
            descriptor: vec![format!("identifier: {}", identifier)],
            manifest: None,
            scripts: Vec::new(),
        }
    }

    pub fn requires(mut self, identifiers: &[&str]) -> Self {
        self.descriptor.push("requires:".to_string());
        for id in identifiers {
            self.descriptor.push(format!("  - {}", id));
        }
        self
    }

    /// `replaces` with a constraint; `*` accepts any version
    pub fn replaces(mut self, identifier: &str, constraint: &str) -> Self {
        self.descriptor.push("replaces:".to_string());
        self.descriptor
            .push(format!("  {}: \"{}\"", identifier, constraint));
        self
    }

    pub fn package(mut self, package: &str) -> Self {
        self.descriptor.push(format!("package: {}", package));
        self
    }

    pub fn elevated(mut self) -> Self {
        self.descriptor.push("elevated: true".to_string());
        self
    }

    pub fn manifest(mut self, content: &str) -> Self {
        self.manifest = Some(content.to_string());
        self
    }

    /// Create an empty script file under `updates/`
    pub fn script(mut self, name: &str) -> Self {
        self.scripts.push(name.to_string());
        self
    }

    pub fn write(self) -> Extension {
        fs::create_dir_all(&self.dir).expect("Failed to create extension directory");
        fs::write(
            self.dir.join(DESCRIPTOR_FILE),
            self.descriptor.join("\n") + "\n",
        )
        .expect("Failed to write descriptor");

        if self.manifest.is_some() || !self.scripts.is_empty() {
            fs::create_dir_all(self.dir.join("updates")).expect("Failed to create updates dir");
        }
        if let Some(manifest) = &self.manifest {
            fs::write(self.dir.join("updates/version.yaml"), manifest)
                .expect("Failed to write version file");
        }
        for script in &self.scripts {
            fs::write(self.dir.join("updates").join(script), "<?php\n")
                .expect("Failed to write script");
        }

        Extension::new(self.identifier, self.kind, self.dir)
    }
}
