//! Staging area for incoming uploads.
//!
//! Each upload lands in its own randomly named file under the staging
//! directory. The handle owns that file: dropping a [`StagedBlob`] removes it
//! unless the content store has already moved it into a slot.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use dcmvault_core::VaultError;

/// Name prefix shared by every staging file.
pub const STAGING_PREFIX: &str = ".upload-";

/// Writes incoming streams to private temporary files.
#[derive(Debug, Clone)]
pub struct Stager {
    dir: PathBuf,
}

impl Stager {
    /// Use `dir` as the staging directory, creating it if needed.
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| {
            VaultError::Storage(format!(
                "Failed to create staging dir {}: {}",
                dir.display(),
                e
            ))
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy the whole stream into a new staging file.
    ///
    /// On a failed copy the partial file is removed before returning.
    pub fn stage<R: Read>(&self, mut reader: R) -> Result<StagedBlob, VaultError> {
        let mut file = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| VaultError::Storage(format!("Failed to create staging file: {}", e)))?;

        let size = io::copy(&mut reader, &mut file)
            .map_err(|e| VaultError::Storage(format!("Failed to write staging file: {}", e)))?;
        file.as_file()
            .sync_data()
            .map_err(|e| VaultError::Storage(format!("Failed to sync staging file: {}", e)))?;

        debug!(path = %file.path().display(), size, "Upload staged");
        Ok(StagedBlob {
            file: Some(file),
            size,
        })
    }

    /// Remove staging files left behind by a previous process.
    ///
    /// Must only run while no upload is in flight.
    pub fn purge_stale(&self) -> Result<usize, VaultError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            let name = entry.file_name();
            if !name.to_string_lossy().starts_with(STAGING_PREFIX) {
                continue;
            }
            match fs::remove_file(entry.path()) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.path().display(), error = %e, "Failed to purge staging file"),
            }
        }
        if removed > 0 {
            info!(removed, "Purged stale staging files");
        }
        Ok(removed)
    }
}

/// A staged upload.
///
/// Release is idempotent and also runs on drop.
#[derive(Debug)]
pub struct StagedBlob {
    file: Option<NamedTempFile>,
    size: u64,
}

impl StagedBlob {
    /// Path of the staging file, or `None` once released or moved.
    pub fn path(&self) -> Option<&Path> {
        self.file.as_ref().map(|f| f.path())
    }

    /// Number of bytes staged.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Remove the staging file if this handle still owns one.
    pub fn release(&mut self) {
        if let Some(file) = self.file.take() {
            let path = file.path().to_path_buf();
            match file.close() {
                Ok(()) => debug!(path = %path.display(), "Staging file released"),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove staging file"),
            }
        }
    }

    /// Move the file out, e.g. for a rename into a slot.
    pub(crate) fn take_file(&mut self) -> Option<NamedTempFile> {
        self.file.take()
    }

    /// Return ownership after a failed move so the file is still released.
    pub(crate) fn restore_file(&mut self, file: NamedTempFile) {
        self.file = Some(file);
    }
}

impl Drop for StagedBlob {
    fn drop(&mut self) {
        self.release();
    }
}
