//! Snapshots of extension directories taken before remote updates

use crate::archive::ArchiveExtractor;
use crate::types::{Extension, ExtensionKind};
use plinth_core::{Error, Result};
use std::path::{Path, PathBuf};

/// Directory under storage holding preserved archives
pub const ARCHIVE_ROOT: &str = "archive";

/// Packs an extension to `<storage>/archive/<kind>s/<identifier>/<version>.tar.gz`
pub struct Preserver<'a> {
    root: PathBuf,
    archiver: &'a dyn ArchiveExtractor,
}

impl<'a> Preserver<'a> {
    pub fn new(storage_dir: &Path, archiver: &'a dyn ArchiveExtractor) -> Self {
        Self {
            root: storage_dir.join(ARCHIVE_ROOT),
            archiver,
        }
    }

    /// Archive path for one extension version
    pub fn archive_path(&self, extension: &Extension, version: &str) -> Result<PathBuf> {
        let kind_dir = match extension.kind {
            ExtensionKind::Plugin | ExtensionKind::Theme => extension.kind.plural(),
            ExtensionKind::Module => return Err(Error::unsupported("module", "preserve")),
        };
        Ok(self
            .root
            .join(kind_dir)
            .join(&extension.identifier)
            .join(format!("{}.tar.gz", version)))
    }

    /// Pack the extension directory as it is now
    pub fn store(&self, extension: &Extension, version: &str) -> Result<PathBuf> {
        let destination = self.archive_path(extension, version)?;
        let path = self.archiver.pack(&extension.path, &destination)?;
        tracing::info!("Preserved {} {} at {}", extension.identifier, version, path.display());
        Ok(path)
    }
}
