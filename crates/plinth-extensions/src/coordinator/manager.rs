//! Per-kind lifecycle coordinator

use super::handlers::handler;
use super::{
    AvailableUpdate, ExtensionManager, ExtensionStatus, LifecycleReport, Services, UninstallOptions,
};
use crate::cache::FileCache;
use crate::engine::MigrationEngine;
use crate::flags::{flag_cache_key, DisableFlag, FlagState, FlagStore};
use crate::ledger::MigrationLedger;
use crate::preserver::Preserver;
use crate::registry::ExtensionRegistry;
use crate::runner::{CommandRunner, MigrationRunner};
use crate::source::guess_path_from_code;
use crate::types::{Extension, ExtensionKind, DESCRIPTOR_FILE, UNINSTALLED_VERSION};
use crate::version_file::{compare_versions, normalize_version, UPDATES_DIR, VERSION_FILE};
use chrono::Duration;
use plinth_core::types::{ExtensionsConfig, PathsConfig, PlinthConfig};
use plinth_core::{Error, Result};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Ledger files live in `<storage>/ledger/<kind>s.json`
pub const LEDGER_DIR: &str = "ledger";

/// Flag caches live in `<storage>/cache/flags-<kind>s.json`
pub const CACHE_DIR: &str = "cache";

/// Registry, migration engine and flag state for one extension kind
pub struct ExtensionCoordinator {
    kind: ExtensionKind,
    root: PathBuf,
    storage_dir: PathBuf,
    config: ExtensionsConfig,
    registry: ExtensionRegistry,
    engine: MigrationEngine,
    flags: FlagStore,
    /// Package reference to the newer version the catalog offers
    available: BTreeMap<String, AvailableUpdate>,
}

impl ExtensionCoordinator {
    /// Coordinator over the configured directories, file ledger and command runner
    pub fn open(kind: ExtensionKind, config: &PlinthConfig) -> Result<Self> {
        let ledger = MigrationLedger::open(ledger_path(kind, &config.paths.storage()));
        let runner = Box::new(CommandRunner::from_config(&config.runner));
        Self::new(kind, config, ledger, runner)
    }

    pub fn new(
        kind: ExtensionKind,
        config: &PlinthConfig,
        ledger: MigrationLedger,
        runner: Box<dyn MigrationRunner>,
    ) -> Result<Self> {
        let root = kind_root(kind, &config.paths);
        let storage_dir = config.paths.storage();
        let registry = discover(kind, &root, &config.extensions)?;
        let mut engine = MigrationEngine::new(ledger, runner);
        let flags = load_flags(kind, &storage_dir, &config.extensions, &registry, &mut engine)?;
        // a cycle fails the whole discovery pass
        registry.topological_order(flags.state().replacements())?;

        Ok(Self {
            kind,
            root,
            storage_dir,
            config: config.extensions.clone(),
            registry,
            engine,
            flags,
            available: BTreeMap::new(),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn registry(&self) -> &ExtensionRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &MigrationEngine {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut MigrationEngine {
        &mut self.engine
    }

    pub fn flags(&self) -> &FlagState {
        self.flags.state()
    }

    pub fn get(&self, identifier: &str) -> Option<&Extension> {
        self.registry.get(identifier)
    }

    /// Canonical identifier of an extension on disk
    pub fn resolve(&self, identifier: &str) -> Result<String> {
        self.registry
            .normalize(identifier)
            .map(str::to_string)
            .ok_or_else(|| Error::unknown_extension(identifier))
    }

    fn extension(&self, code: &str) -> Result<Extension> {
        self.registry
            .get(code)
            .cloned()
            .ok_or_else(|| Error::unknown_extension(code))
    }

    pub fn is_disabled(&self, identifier: &str) -> bool {
        self.flags.is_disabled(identifier)
    }

    /// Ledger version is anything but "0"
    pub fn is_installed(&mut self, identifier: &str) -> Result<bool> {
        let code = self
            .registry
            .normalize(identifier)
            .unwrap_or(identifier)
            .to_string();
        Ok(self.engine.current_version(&code)? != UNINSTALLED_VERSION)
    }

    pub fn is_frozen(&self, code: &str) -> Result<bool> {
        Ok(self
            .engine
            .ledger()
            .record(code)?
            .is_some_and(|record| record.is_frozen))
    }

    /// Rescan the kind's root and recompute flags
    pub fn reload(&mut self) -> Result<()> {
        let registry = discover(self.kind, &self.root, &self.config)?;
        self.engine.clear_caches();
        let flags = load_flags(
            self.kind,
            &self.storage_dir,
            &self.config,
            &registry,
            &mut self.engine,
        )?;
        registry.topological_order(flags.state().replacements())?;

        self.registry = registry;
        self.flags = flags;
        Ok(())
    }

    /// Active identifiers in dependency order
    fn active_order(&self) -> Result<Vec<String>> {
        Ok(self
            .registry
            .topological_order(self.flags.state().replacements())?
            .into_iter()
            .filter(|code| !self.flags.is_disabled(code))
            .collect())
    }

    /// Every identifier, dependents first
    fn teardown_order(&self) -> Result<Vec<String>> {
        let mut order = self
            .registry
            .topological_order(self.flags.state().replacements())?;
        order.reverse();
        Ok(order)
    }

    /// Extensions allowed to boot; restricted mode keeps only elevated ones
    pub fn bootable(&self) -> Vec<&Extension> {
        self.registry
            .extensions()
            .filter(|ext| !self.flags.is_disabled(&ext.identifier))
            .filter(|ext| !self.config.restricted_mode || ext.is_elevated)
            .collect()
    }

    /// Scaffold a new extension with a first version, then refresh it
    pub fn create(&mut self, services: &mut Services, identifier: &str) -> Result<Extension> {
        if !handler(self.kind).scaffolds {
            return Err(Error::unsupported(self.kind.as_str(), "create"));
        }
        if self.registry.contains(identifier) {
            return Err(Error::invalid_operation(format!("{} already exists", identifier)));
        }
        if self.kind == ExtensionKind::Plugin && identifier.split('.').count() != 2 {
            return Err(Error::invalid_operation(format!(
                "Plugin identifiers take the form Vendor.Name, got {}",
                identifier
            )));
        }

        let path = guess_path_from_code(self.kind, &self.root, identifier);
        if path.exists() {
            return Err(Error::invalid_operation(format!(
                "{} already exists",
                path.display()
            )));
        }

        let name = identifier.rsplit('.').next().unwrap_or(identifier);
        fs::create_dir_all(path.join(UPDATES_DIR))?;
        fs::write(
            path.join(DESCRIPTOR_FILE),
            format!("identifier: {}\nname: {}\n", identifier, name),
        )?;
        fs::write(path.join(VERSION_FILE), "1.0.0: First version\n")?;
        info!("Created {} {} at {}", self.kind, identifier, path.display());

        self.reload()?;
        self.refresh_one(services, identifier)?;
        self.extension(&self.resolve(identifier)?)
    }

    /// Take over the ledger of a replaced extension, then apply every
    /// pending migration. Versions inherited from the replaced extension
    /// are not run again.
    pub fn migrate(&mut self, identifier: &str) -> Result<LifecycleReport> {
        let code = self.resolve(identifier)?;
        let extension = self.extension(&code)?;
        let mut report = LifecycleReport::default();

        if self.migrate_replacement_of(&extension)? {
            report.note(format!(
                "{}: took over the ledger of {}",
                code,
                extension.replaced_identifier().unwrap_or_default()
            ));
        }

        let applied = self.engine.apply_up_to(&extension, None)?;
        if applied.nothing_to_migrate() {
            report.note(format!("{}: nothing to migrate", code));
        }
        for line in &applied.lines {
            report.note(format!("{}: {}", code, line));
        }
        Ok(report)
    }

    fn migrate_replacement_of(&mut self, extension: &Extension) -> Result<bool> {
        let targets: Vec<&String> = extension.replaces.keys().collect();
        let target = match targets.as_slice() {
            [] => return Ok(false),
            [target] => target.as_str(),
            _ => {
                return Err(Error::invalid_operation(format!(
                    "{} declares more than one replacement",
                    extension.identifier
                )))
            }
        };

        if self
            .flags
            .state()
            .has_flag(&extension.identifier, DisableFlag::ReplacementFailed)
        {
            return Ok(false);
        }

        let migrated = self.engine.migrate_replacement(extension, target)?;
        if migrated {
            self.flags.clear()?;
        }
        Ok(migrated)
    }

    /// Download and unpack a newer artifact when the catalog offers one
    fn update_files(&mut self, services: &mut Services, code: &str) -> Result<bool> {
        let extension = self.extension(code)?;
        let Some(package) = extension.package.as_deref() else {
            return Ok(false);
        };
        if self.is_frozen(code)? {
            debug!("{} is frozen, skipping remote update", code);
            return Ok(false);
        }
        let Some(available) = self.available.get(package).cloned() else {
            return Ok(false);
        };
        if compare_versions(&available.to, &available.from) != Ordering::Greater {
            return Ok(false);
        }
        let (Some(download), Some(catalog)) = (handler(self.kind).download, services.catalog.as_ref())
        else {
            return Ok(false);
        };
        let hash = available
            .hash
            .as_deref()
            .ok_or_else(|| Error::remote_catalog(format!("No artifact hash offered for {}", package)))?;

        let current = self.engine.current_version(code)?;
        Preserver::new(&services.storage_dir, services.archiver.as_ref()).store(&extension, &current)?;

        download(catalog, package, hash)?;
        catalog.extract(package, hash, &self.root, services.archiver.as_ref())?;

        self.engine.clear_caches();
        self.available.remove(package);
        info!("Updated files of {} to {}", code, available.to);
        Ok(true)
    }

    fn update_one(&mut self, services: &mut Services, code: &str, migrations_only: bool) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        if !migrations_only && self.update_files(services, code)? {
            report.note(format!("{}: downloaded new files", code));
        }
        report.merge(self.migrate(code)?);
        Ok(report)
    }

    fn rollback_one(&mut self, identifier: &str, target: Option<&str>) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();

        let Some(code) = self.registry.normalize(identifier).map(str::to_string) else {
            if self.engine.purge(identifier)? {
                report.note(format!("{}: purged from database", identifier));
                return Ok(report);
            }
            return Err(Error::unknown_extension(identifier));
        };

        let target = target.map(normalize_version);
        if let Some(target) = target {
            if !self.engine.ledger().has_version(&code, target)? {
                return Err(Error::target_version_not_found(&code, target));
            }
        }

        let extension = self.extension(&code)?;
        loop {
            let reverted = self.engine.revert_to(&extension, target, false)?;
            if !reverted.has_version_file || reverted.removed == 0 {
                break;
            }
        }

        let version = self.engine.current_version(&code)?;
        report.note(match self.engine.current_note(&code)? {
            Some(note) => format!("{}: Current Version: {} ({})", code, version, note),
            None => format!("{}: Current Version: {}", code, version),
        });
        Ok(report)
    }

    /// Roll one extension all the way back and migrate it again
    pub fn refresh_one(&mut self, services: &mut Services, identifier: &str) -> Result<LifecycleReport> {
        let code = self.resolve(identifier)?;
        let mut report = self.rollback_one(&code, None)?;
        report.merge(self.update_one(services, &code, true)?);
        Ok(report)
    }

    fn is_active_theme(&self, code: &str) -> bool {
        self.kind == ExtensionKind::Theme
            && self
                .config
                .active_theme
                .as_deref()
                .is_some_and(|active| active.eq_ignore_ascii_case(code))
    }

    fn remove(&mut self, services: &mut Services, code: &str, options: UninstallOptions) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let extension = self.extension(code)?;

        if !options.no_rollback {
            report.merge(self.rollback_one(code, None)?);
        }

        let delete = handler(self.kind).deletes_files && !options.preserve_files;
        if delete {
            remove_extension_dir(&self.root, &extension.path)?;
            report.note(format!("{}: deleted {}", code, extension.path.display()));
        }
        if self.kind == ExtensionKind::Theme {
            services.parameters.forget_theme(code)?;
        }

        self.flags.clear()?;
        if delete {
            self.reload()?;
        }
        info!("Uninstalled {} {}", self.kind, code);
        report.note(format!("{}: uninstalled", code));
        Ok(report)
    }

    pub fn freeze(&mut self, identifier: &str) -> Result<()> {
        self.set_frozen(identifier, true)
    }

    pub fn unfreeze(&mut self, identifier: &str) -> Result<()> {
        self.set_frozen(identifier, false)
    }

    fn set_frozen(&mut self, identifier: &str, frozen: bool) -> Result<()> {
        let code = self.resolve(identifier)?;
        self.engine.ledger_mut().set_frozen(&code, frozen)?;
        info!("{} {}", if frozen { "Froze" } else { "Unfroze" }, code);
        Ok(())
    }

    fn set_flag(&mut self, identifier: &str, flag: DisableFlag, disabled: bool) -> Result<()> {
        if !handler(self.kind).toggles {
            let operation = if disabled { "disable" } else { "enable" };
            return Err(Error::unsupported(self.kind.as_str(), operation));
        }

        let code = self.resolve(identifier)?;
        if disabled {
            self.flags.flag(&code, flag);
        } else {
            self.flags.unflag(&code, flag);
        }

        if flag == DisableFlag::ByUser {
            self.engine.ledger_mut().set_disabled(&code, disabled)?;
            self.flags.clear()?;
        }

        debug!(
            "{} {} ({})",
            if disabled { "Flagged" } else { "Unflagged" },
            code,
            flag
        );
        Ok(())
    }

    /// Remember what the catalog offers, keyed by package reference
    pub fn set_available_updates(&mut self, available: BTreeMap<String, AvailableUpdate>) {
        self.available = available;
    }

    /// Ledger versions of every installed identifier
    pub fn installed_versions(&self) -> Result<BTreeMap<String, String>> {
        Ok(self
            .engine
            .ledger()
            .records()?
            .into_iter()
            .filter(|record| record.version != UNINSTALLED_VERSION)
            .map(|record| (record.code, record.version))
            .collect())
    }

    pub fn frozen_codes(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .engine
            .ledger()
            .records()?
            .into_iter()
            .filter(|record| record.is_frozen)
            .map(|record| record.code)
            .collect())
    }

    /// Ledger records whose files are gone cannot receive updates
    pub fn non_updatable_codes(&self) -> Result<BTreeSet<String>> {
        Ok(self
            .engine
            .ledger()
            .records()?
            .into_iter()
            .filter(|record| !self.registry.contains(&record.code))
            .map(|record| record.code)
            .collect())
    }
}

impl ExtensionManager for ExtensionCoordinator {
    fn kind(&self) -> ExtensionKind {
        self.kind
    }

    fn list(&mut self, include_disabled: bool) -> Result<Vec<ExtensionStatus>> {
        let mut statuses = Vec::new();
        for code in self.registry.identifiers() {
            let flags = self.flags.state().flags_of(&code);
            if !include_disabled && !flags.is_empty() {
                continue;
            }
            let version = self.engine.current_version(&code)?;
            let is_frozen = self.is_frozen(&code)?;
            let path = self.extension(&code)?.path;
            statuses.push(ExtensionStatus {
                identifier: code,
                kind: self.kind,
                version,
                flags,
                is_frozen,
                path,
            });
        }
        Ok(statuses)
    }

    fn install(&mut self, services: &mut Services, identifier: &str) -> Result<LifecycleReport> {
        (handler(self.kind).install)(self, services, identifier)
    }

    fn enable(&mut self, identifier: &str, flag: DisableFlag) -> Result<()> {
        self.set_flag(identifier, flag, false)
    }

    fn disable(&mut self, identifier: &str, flag: DisableFlag) -> Result<()> {
        self.set_flag(identifier, flag, true)
    }

    fn update(
        &mut self,
        services: &mut Services,
        identifier: Option<&str>,
        migrations_only: bool,
    ) -> Result<LifecycleReport> {
        if let Some(identifier) = identifier {
            let code = self.resolve(identifier)?;
            return self.update_one(services, &code, migrations_only);
        }

        let mut report = LifecycleReport::default();
        for code in self.active_order()? {
            match self.update_one(services, &code, migrations_only) {
                Ok(done) => report.merge(done),
                Err(e) => {
                    warn!("Updating {} failed: {}", code, e);
                    report.fail(code, e);
                }
            }
        }

        if self.kind == ExtensionKind::Module && report.is_success() {
            services.parameters.set_update_count(0)?;
        }
        Ok(report)
    }

    fn refresh(&mut self, services: &mut Services, identifier: Option<&str>) -> Result<LifecycleReport> {
        match identifier {
            Some(identifier) => self.refresh_one(services, identifier),
            None => {
                let mut report = self.rollback(None, None)?;
                report.merge(self.update(services, None, true)?);
                Ok(report)
            }
        }
    }

    fn rollback(&mut self, identifier: Option<&str>, target: Option<&str>) -> Result<LifecycleReport> {
        if let Some(identifier) = identifier {
            return self.rollback_one(identifier, target);
        }

        let mut report = LifecycleReport::default();
        for code in self.teardown_order()? {
            report.merge(self.rollback_one(&code, None)?);
        }
        Ok(report)
    }

    fn uninstall(
        &mut self,
        services: &mut Services,
        identifier: &str,
        options: UninstallOptions,
    ) -> Result<LifecycleReport> {
        let Some(code) = self.registry.normalize(identifier).map(str::to_string) else {
            // files already gone: only the ledger is left to clean
            return self.rollback_one(identifier, None);
        };
        if self.is_active_theme(&code) {
            return Err(Error::invalid_operation(format!(
                "{} is the active theme and cannot be uninstalled",
                code
            )));
        }
        self.remove(services, &code, options)
    }

    fn tear_down(&mut self, services: &mut Services) -> Result<LifecycleReport> {
        let mut report = LifecycleReport::default();
        let options = UninstallOptions {
            no_rollback: false,
            preserve_files: true,
        };
        for code in self.teardown_order()? {
            report.merge(self.remove(services, &code, options)?);
        }

        self.engine.ledger_mut().drop_storage()?;
        self.flags.clear()?;
        report.note(format!("Dropped the {} ledger", self.kind));
        Ok(report)
    }

    fn available_updates(&self, identifier: Option<&str>) -> BTreeMap<String, AvailableUpdate> {
        self.registry
            .extensions()
            .filter(|ext| identifier.is_none_or(|id| ext.identifier.eq_ignore_ascii_case(id)))
            .filter_map(|ext| {
                let update = self.available.get(ext.package.as_deref()?)?;
                (compare_versions(&update.to, &update.from) == Ordering::Greater)
                    .then(|| (ext.identifier.clone(), update.clone()))
            })
            .collect()
    }

    fn warnings(&self) -> Vec<String> {
        let state = self.flags.state();
        let mut warnings = Vec::new();

        for (code, missing) in self.registry.find_missing_dependencies(state.replacements()) {
            for dependency in missing {
                warnings.push(format!("{} requires {}, which was not found", code, dependency));
            }
        }
        for (target, replacement) in state.active_replacements() {
            warnings.push(format!("{} is replacing {}", replacement, target));
        }
        warnings
    }
}

fn kind_root(kind: ExtensionKind, paths: &PathsConfig) -> PathBuf {
    match kind {
        ExtensionKind::Plugin => paths.plugins(),
        ExtensionKind::Theme => paths.themes(),
        ExtensionKind::Module => paths.modules(),
    }
}

pub fn ledger_path(kind: ExtensionKind, storage_dir: &Path) -> PathBuf {
    storage_dir
        .join(LEDGER_DIR)
        .join(format!("{}.json", kind.plural()))
}

fn discover(kind: ExtensionKind, root: &Path, config: &ExtensionsConfig) -> Result<ExtensionRegistry> {
    let allowed = match kind {
        ExtensionKind::Module => Some(config.load_modules.as_slice()),
        _ => None,
    };
    ExtensionRegistry::discover(kind, root, allowed)
}

fn config_disabled(kind: ExtensionKind, config: &ExtensionsConfig) -> Vec<String> {
    match kind {
        ExtensionKind::Plugin => config.disable_plugins.clone(),
        _ => Vec::new(),
    }
}

/// Version each extension is judged at for replacement: the ledger
/// version, or the newest manifest version when nothing is recorded
fn judged_versions(registry: &ExtensionRegistry, engine: &mut MigrationEngine) -> Result<BTreeMap<String, String>> {
    let mut versions = BTreeMap::new();
    for extension in registry.extensions() {
        let mut version = engine.current_version(&extension.identifier)?;
        if version == UNINSTALLED_VERSION {
            if let Some(latest) = engine
                .manifest(extension)
                .ok()
                .and_then(|manifest| manifest.latest().map(str::to_string))
            {
                version = latest;
            }
        }
        versions.insert(extension.identifier.clone(), version);
    }
    Ok(versions)
}

fn load_flags(
    kind: ExtensionKind,
    storage_dir: &Path,
    config: &ExtensionsConfig,
    registry: &ExtensionRegistry,
    engine: &mut MigrationEngine,
) -> Result<FlagStore> {
    let config_disabled = config_disabled(kind, config);
    let key = flag_cache_key(&registry.identifiers(), &config_disabled);
    let cache = FileCache::open(
        storage_dir
            .join(CACHE_DIR)
            .join(format!("flags-{}.json", kind.plural())),
    );

    FlagStore::load(cache, key, Duration::days(config.flag_cache_ttl_days), || {
        let user_disabled = engine.ledger().disabled_codes()?;
        let judged = judged_versions(registry, engine)?;
        Ok(FlagState::compute(
            registry,
            &config_disabled,
            &user_disabled,
            |extension| {
                judged
                    .get(&extension.identifier)
                    .cloned()
                    .unwrap_or_else(|| UNINSTALLED_VERSION.to_string())
            },
        ))
    })
}

/// Remove an extension directory, and a plugin's vendor directory once empty
fn remove_extension_dir(root: &Path, path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path)?;
    }
    if let Some(parent) = path.parent() {
        if parent != root && parent.starts_with(root) && fs::read_dir(parent)?.next().is_none() {
            fs::remove_dir(parent)?;
        }
    }
    Ok(())
}
