//! Archive extraction and packing for extension artifacts

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use plinth_core::{Error, Result};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tar::{Archive, Builder};

/// Unpacks downloaded artifacts and packs extension directories
#[cfg_attr(test, mockall::automock)]
pub trait ArchiveExtractor {
    /// Extract `archive` into `destination`, then delete the archive
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()>;

    /// Pack the contents of `source` into `destination`
    fn pack(&self, source: &Path, destination: &Path) -> Result<PathBuf>;
}

/// Gzip-compressed tar archives
#[derive(Debug, Clone, Copy, Default)]
pub struct TarGzArchiver;

impl TarGzArchiver {
    fn unpack(archive: &Path, destination: &Path) -> anyhow::Result<()> {
        fs::create_dir_all(destination)?;
        let file = File::open(archive)?;
        let mut tar = Archive::new(GzDecoder::new(file));
        tar.set_preserve_permissions(true);
        tar.unpack(destination)?;
        Ok(())
    }

    fn build(source: &Path, destination: &Path) -> anyhow::Result<()> {
        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(destination)?;
        let mut builder = Builder::new(GzEncoder::new(file, Compression::default()));
        builder.append_dir_all(".", source)?;
        builder.into_inner()?.finish()?;
        Ok(())
    }
}

impl ArchiveExtractor for TarGzArchiver {
    fn extract(&self, archive: &Path, destination: &Path) -> Result<()> {
        if let Err(e) = Self::unpack(archive, destination) {
            tracing::warn!("Extracting {} failed: {:#}", archive.display(), e);
            return Err(Error::extract_failed(archive.display().to_string()));
        }

        if let Err(e) = fs::remove_file(archive) {
            tracing::debug!("Could not remove {}: {}", archive.display(), e);
        }
        Ok(())
    }

    fn pack(&self, source: &Path, destination: &Path) -> Result<PathBuf> {
        if !source.is_dir() {
            return Err(Error::pack_failed(source.display().to_string()));
        }
        if let Err(e) = Self::build(source, destination) {
            tracing::warn!("Packing {} failed: {:#}", source.display(), e);
            return Err(Error::pack_failed(source.display().to_string()));
        }
        Ok(destination.to_path_buf())
    }
}
