//! Extension lifecycle management for plinth
//!
//! This crate handles:
//! - Extension discovery and dependency ordering
//! - Version files and the migration ledger
//! - Applying and reverting migrations
//! - Per-kind lifecycle coordination (plugins, themes, modules)
//! - Signed requests to the remote catalog and artifact downloads
//! - Update checks

pub mod archive;
pub mod cache;
pub mod catalog;
pub mod coordinator;
pub mod engine;
pub mod flags;
pub mod ledger;
pub mod parameters;
pub mod preserver;
pub mod registry;
pub mod runner;
pub mod source;
pub mod system;
pub mod types;
pub mod updates;
pub mod version_file;

pub use archive::{ArchiveExtractor, TarGzArchiver};
pub use catalog::{CatalogClient, HttpTransport, Transport, TransportResponse};
pub use coordinator::{
    ExtensionCoordinator, ExtensionManager, ExtensionStatus, LifecycleReport, Services,
    UninstallOptions,
};
pub use engine::{ApplyReport, MigrationEngine, RevertReport};
pub use flags::DisableFlag;
pub use ledger::MigrationLedger;
pub use parameters::ParameterStore;
pub use registry::ExtensionRegistry;
pub use runner::{CommandRunner, MigrationRunner};
pub use source::{ExtensionSource, SourceOrigin, SourceStatus};
pub use system::ExtensionSystem;
pub use types::{Extension, ExtensionKind};
pub use updates::{UpdateChecker, UpdateList};
pub use version_file::{VersionFileReader, VersionManifest};
