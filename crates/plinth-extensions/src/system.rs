//! All three coordinators plus their shared services

use crate::coordinator::{tear_down_system, ExtensionCoordinator, ExtensionManager, LifecycleReport, Services};
use crate::types::ExtensionKind;
use crate::updates::{request_update_list, InstalledState, UpdateChecker, UpdateList};
use plinth_core::types::PlinthConfig;
use plinth_core::{Error, Result};

/// One installation: plugins, themes and modules
pub struct ExtensionSystem {
    config: PlinthConfig,
    services: Services,
    plugins: ExtensionCoordinator,
    themes: ExtensionCoordinator,
    modules: ExtensionCoordinator,
}

impl ExtensionSystem {
    pub fn open(config: PlinthConfig) -> Result<Self> {
        let services = Services::from_config(&config)?;
        let plugins = ExtensionCoordinator::open(ExtensionKind::Plugin, &config)?;
        let themes = ExtensionCoordinator::open(ExtensionKind::Theme, &config)?;
        let modules = ExtensionCoordinator::open(ExtensionKind::Module, &config)?;
        Ok(Self::from_parts(config, services, plugins, themes, modules))
    }

    pub fn from_parts(
        config: PlinthConfig,
        services: Services,
        plugins: ExtensionCoordinator,
        themes: ExtensionCoordinator,
        modules: ExtensionCoordinator,
    ) -> Self {
        Self {
            config,
            services,
            plugins,
            themes,
            modules,
        }
    }

    pub fn config(&self) -> &PlinthConfig {
        &self.config
    }

    pub fn services(&mut self) -> &mut Services {
        &mut self.services
    }

    pub fn coordinator(&self, kind: ExtensionKind) -> &ExtensionCoordinator {
        match kind {
            ExtensionKind::Plugin => &self.plugins,
            ExtensionKind::Theme => &self.themes,
            ExtensionKind::Module => &self.modules,
        }
    }

    /// A coordinator together with the services its operations take
    pub fn split(&mut self, kind: ExtensionKind) -> (&mut ExtensionCoordinator, &mut Services) {
        let coordinator = match kind {
            ExtensionKind::Plugin => &mut self.plugins,
            ExtensionKind::Theme => &mut self.themes,
            ExtensionKind::Module => &mut self.modules,
        };
        (coordinator, &mut self.services)
    }

    /// Kind of the extension with this identifier, searching plugins first
    pub fn find(&self, identifier: &str) -> Result<ExtensionKind> {
        [ExtensionKind::Plugin, ExtensionKind::Theme, ExtensionKind::Module]
            .into_iter()
            .find(|kind| self.coordinator(*kind).registry().contains(identifier))
            .ok_or_else(|| Error::unknown_extension(identifier))
    }

    /// Ask the catalog for updates and hand the offered plugin versions to
    /// the plugin coordinator
    pub fn request_updates(&mut self, force: bool) -> Result<UpdateList> {
        let installed = InstalledState::collect(&self.plugins, &self.services.parameters)?;
        let catalog = self
            .services
            .catalog
            .as_ref()
            .ok_or_else(|| Error::remote_catalog("No catalog is configured"))?;

        let list = request_update_list(
            catalog,
            &mut self.services.parameters,
            &installed,
            self.config.extensions.disable_core_updates,
            force,
        )?;
        let available = list.available_by_package(&self.plugins);
        self.plugins.set_available_updates(available);
        Ok(list)
    }

    /// Cached or freshly requested number of available updates
    pub fn check_updates(&mut self, force: bool) -> Result<u64> {
        let installed = InstalledState::collect(&self.plugins, &self.services.parameters)?;
        let disable_core_updates = self.config.extensions.disable_core_updates;
        let Services {
            parameters,
            catalog,
            ..
        } = &mut self.services;

        UpdateChecker::new(parameters, &self.config.updates).check(force, |parameters| {
            let catalog = catalog
                .as_ref()
                .ok_or_else(|| Error::remote_catalog("No catalog is configured"))?;
            request_update_list(catalog, parameters, &installed, disable_core_updates, false)
        })
    }

    /// Uninstall everything, modules first, and drop every ledger
    pub fn tear_down(&mut self) -> Result<LifecycleReport> {
        let mut managers: [&mut dyn ExtensionManager; 3] =
            [&mut self.modules, &mut self.plugins, &mut self.themes];
        tear_down_system(&mut managers, &mut self.services)
    }
}
