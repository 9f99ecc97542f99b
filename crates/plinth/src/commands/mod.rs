//! CLI command implementations

pub mod extension;
pub mod teardown;

use anyhow::{bail, Context, Result};
use camino::Utf8Path;
use plinth_core::HierarchicalConfigLoader;
use plinth_extensions::{ExtensionSystem, LifecycleReport};
use tracing::debug;

use crate::output;

/// Load the configuration and open every coordinator
pub(crate) fn open_system(config: Option<&Utf8Path>) -> Result<ExtensionSystem> {
    let loader = HierarchicalConfigLoader::new()?;
    let config = match config {
        Some(path) => {
            debug!("Loading configuration from {}", path);
            loader.load_from(path)?
        }
        None => loader.load()?,
    };
    debug!("Plugins in {}", config.paths.plugins().display());
    ExtensionSystem::open(config).context("Failed to open the extension system")
}

/// Print report lines and return the number of failures
pub(crate) fn show_report(report: &LifecycleReport) -> usize {
    for message in &report.messages {
        output::info(message);
    }
    for failure in &report.failures {
        output::failure(&failure.identifier, &failure.error);
    }
    report.failures.len()
}

/// Print report lines; any failure makes the command fail
pub(crate) fn print_report(report: &LifecycleReport) -> Result<()> {
    fail_on(show_report(report))
}

/// Fail once a batch is over if any extension failed
pub(crate) fn fail_on(failures: usize) -> Result<()> {
    if failures > 0 {
        bail!("{} extension(s) failed", failures);
    }
    Ok(())
}
