//! Content-addressed slot storage.
//!
//! Each fingerprint owns the directory `<root>/<fingerprint>/` holding
//! `original.dcm` and `preview.png`. The directory is created with a single
//! non-recursive `mkdir`, so of several uploads racing for one fingerprint
//! exactly one gets [`SlotClaim::Claimed`]. Files are moved in with
//! no-clobber renames and a committed original is never overwritten.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use dcmvault_core::{Fingerprint, VaultError};

use crate::catalog::CatalogStore;
use crate::staging::StagedBlob;

pub const ORIGINAL_FILE: &str = "original.dcm";
pub const PREVIEW_FILE: &str = "preview.png";

/// Result of trying to claim a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SlotClaim {
    /// This caller created the slot and owns it until commit or discard.
    Claimed(PathBuf),
    /// Another ingest created the slot first.
    AlreadyExists,
}

/// Slot operations used by the ingestion pipeline.
pub trait SlotStore: Send + Sync {
    fn slot_path(&self, fp: &Fingerprint) -> PathBuf;

    fn original_path(&self, fp: &Fingerprint) -> PathBuf {
        self.slot_path(fp).join(ORIGINAL_FILE)
    }

    fn preview_path(&self, fp: &Fingerprint) -> PathBuf {
        self.slot_path(fp).join(PREVIEW_FILE)
    }

    /// Atomically create the slot directory.
    fn create_slot(&self, fp: &Fingerprint) -> Result<SlotClaim, VaultError>;

    /// Move the staged file into the slot as the original.
    ///
    /// On failure the staged file stays with `staged`.
    fn commit_original(
        &self,
        staged: &mut StagedBlob,
        fp: &Fingerprint,
    ) -> Result<PathBuf, VaultError>;

    /// Write the preview into the slot.
    fn commit_preview(&self, bytes: &[u8], fp: &Fingerprint) -> Result<PathBuf, VaultError>;

    /// Remove the slot and everything in it. Best effort; never fails.
    fn discard_slot(&self, fp: &Fingerprint);
}

/// Outcome of an orphan sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Slot directories examined.
    pub scanned: usize,
    /// Slots with no catalog record that were removed.
    pub removed: usize,
    /// Orphans that could not be removed.
    pub failed: usize,
}

/// Filesystem-backed [`SlotStore`].
#[derive(Debug, Clone)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Use `root` for slots, creating it if needed.
    ///
    /// The root is canonicalized so every spelling of the same directory
    /// yields the same slot paths.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, VaultError> {
        let root = root.into();
        let storage_err = |e: io::Error| {
            VaultError::Storage(format!(
                "Failed to create content dir {}: {}",
                root.display(),
                e
            ))
        };
        fs::create_dir_all(&root).map_err(storage_err)?;
        let root = fs::canonicalize(&root).map_err(storage_err)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The preview that sits next to a stored original.
    pub fn preview_for_location(location: &str) -> PathBuf {
        Path::new(location).with_file_name(PREVIEW_FILE)
    }

    /// Remove slots whose fingerprint has no catalog record.
    ///
    /// A slot is orphaned when a process died between claiming it and
    /// inserting the catalog row. Slots are matched by fingerprint, not by
    /// path, so a record written under another spelling of the root still
    /// protects its slot. Only safe while no ingest is running.
    pub fn sweep_orphans<C: CatalogStore + ?Sized>(
        &self,
        catalog: &C,
    ) -> Result<SweepReport, VaultError> {
        let mut report = SweepReport::default();

        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Ok(fp) = entry.file_name().to_string_lossy().parse::<Fingerprint>() else {
                continue;
            };
            report.scanned += 1;

            if catalog.has_fingerprint(&fp)? {
                continue;
            }

            match fs::remove_dir_all(entry.path()) {
                Ok(()) => {
                    debug!(fingerprint = %fp, "Removed orphaned slot");
                    report.removed += 1;
                }
                Err(e) => {
                    warn!(fingerprint = %fp, error = %e, "Failed to remove orphaned slot");
                    report.failed += 1;
                }
            }
        }

        info!(
            scanned = report.scanned,
            removed = report.removed,
            failed = report.failed,
            "Orphan sweep complete"
        );
        Ok(report)
    }
}

impl SlotStore for ContentStore {
    fn slot_path(&self, fp: &Fingerprint) -> PathBuf {
        self.root.join(fp.to_hex())
    }

    fn create_slot(&self, fp: &Fingerprint) -> Result<SlotClaim, VaultError> {
        let path = self.slot_path(fp);
        match fs::create_dir(&path) {
            Ok(()) => {
                debug!(slot = %path.display(), "Slot claimed");
                Ok(SlotClaim::Claimed(path))
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(SlotClaim::AlreadyExists),
            Err(e) => Err(VaultError::Storage(format!(
                "Failed to create slot {}: {}",
                path.display(),
                e
            ))),
        }
    }

    fn commit_original(
        &self,
        staged: &mut StagedBlob,
        fp: &Fingerprint,
    ) -> Result<PathBuf, VaultError> {
        let target = self.original_path(fp);
        let file = staged
            .take_file()
            .ok_or_else(|| VaultError::Storage("staged file already released".to_string()))?;

        match file.persist_noclobber(&target) {
            Ok(_) => {
                debug!(path = %target.display(), "Original committed");
                Ok(target)
            }
            Err(e) => {
                staged.restore_file(e.file);
                Err(VaultError::Storage(format!(
                    "Failed to commit original to {}: {}",
                    target.display(),
                    e.error
                )))
            }
        }
    }

    fn commit_preview(&self, bytes: &[u8], fp: &Fingerprint) -> Result<PathBuf, VaultError> {
        let slot = self.slot_path(fp);
        let target = self.preview_path(fp);
        let storage_err = |e: io::Error| {
            VaultError::Storage(format!(
                "Failed to commit preview to {}: {}",
                target.display(),
                e
            ))
        };

        let mut tmp = tempfile::Builder::new()
            .prefix(".preview-")
            .tempfile_in(&slot)
            .map_err(storage_err)?;
        tmp.write_all(bytes).map_err(storage_err)?;
        tmp.as_file().sync_data().map_err(storage_err)?;
        tmp.persist_noclobber(&target)
            .map_err(|e| storage_err(e.error))?;

        debug!(path = %target.display(), bytes = bytes.len(), "Preview committed");
        Ok(target)
    }

    fn discard_slot(&self, fp: &Fingerprint) {
        let path = self.slot_path(fp);
        match fs::remove_dir_all(&path) {
            Ok(()) => debug!(slot = %path.display(), "Slot discarded"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(slot = %path.display(), error = %e, "Failed to discard slot"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Catalog, Database, Stager};
    use chrono::Utc;
    use dcmvault_core::{Metadata, NewArtifact};
    use std::sync::Arc;

    fn fingerprint(value: &str) -> Fingerprint {
        let metadata: Metadata = [("PatientID", value)].into_iter().collect();
        Fingerprint::of(&metadata).unwrap()
    }

    fn setup() -> (tempfile::TempDir, Stager, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let stager = Stager::new(dir.path().join("staging")).unwrap();
        let store = ContentStore::new(dir.path().join("final")).unwrap();
        (dir, stager, store)
    }

    #[test]
    fn test_slot_layout() {
        let (_dir, _, store) = setup();
        let fp = fingerprint("1");
        let slot = store.slot_path(&fp);
        assert_eq!(slot, store.root().join(fp.to_hex()));
        assert_eq!(store.original_path(&fp), slot.join("original.dcm"));
        assert_eq!(store.preview_path(&fp), slot.join("preview.png"));
        assert_eq!(
            ContentStore::preview_for_location(&store.original_path(&fp).to_string_lossy()),
            store.preview_path(&fp)
        );
    }

    #[test]
    fn test_create_slot_once() {
        let (_dir, _, store) = setup();
        let fp = fingerprint("1");
        assert!(matches!(store.create_slot(&fp).unwrap(), SlotClaim::Claimed(_)));
        assert_eq!(store.create_slot(&fp).unwrap(), SlotClaim::AlreadyExists);
    }

    #[test]
    fn test_create_slot_race_has_one_winner() {
        let (_dir, _, store) = setup();
        let store = Arc::new(store);
        let fp = fingerprint("race");

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || store.create_slot(&fp).unwrap())
            })
            .collect();
        let claimed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|c| matches!(c, SlotClaim::Claimed(_)))
            .count();
        assert_eq!(claimed, 1);
    }

    #[test]
    fn test_commit_original_and_preview() {
        let (dir, stager, store) = setup();
        let fp = fingerprint("1");
        store.create_slot(&fp).unwrap();

        let mut blob = stager.stage(&b"DICOM bytes"[..]).unwrap();
        let original = store.commit_original(&mut blob, &fp).unwrap();
        assert_eq!(fs::read(&original).unwrap(), b"DICOM bytes");
        assert!(blob.path().is_none());
        blob.release();

        let preview = store.commit_preview(b"\x89PNG", &fp).unwrap();
        assert_eq!(fs::read(&preview).unwrap(), b"\x89PNG");

        let mut names: Vec<String> = fs::read_dir(store.slot_path(&fp))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        assert_eq!(names, vec!["original.dcm", "preview.png"]);
        assert_eq!(fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_original_never_overwrites() {
        let (dir, stager, store) = setup();
        let fp = fingerprint("1");
        store.create_slot(&fp).unwrap();

        let mut first = stager.stage(&b"first"[..]).unwrap();
        store.commit_original(&mut first, &fp).unwrap();

        let mut second = stager.stage(&b"second"[..]).unwrap();
        assert!(store.commit_original(&mut second, &fp).is_err());
        // The loser still owns its staging file.
        assert!(second.path().unwrap().exists());
        second.release();

        assert_eq!(fs::read(store.original_path(&fp)).unwrap(), b"first");
        assert_eq!(fs::read_dir(dir.path().join("staging")).unwrap().count(), 0);
    }

    #[test]
    fn test_commit_without_slot_fails() {
        let (_dir, stager, store) = setup();
        let fp = fingerprint("missing");
        let mut blob = stager.stage(&b"x"[..]).unwrap();
        assert!(store.commit_original(&mut blob, &fp).is_err());
        assert!(blob.path().is_some());
        assert!(store.commit_preview(b"png", &fp).is_err());
    }

    #[test]
    fn test_discard_slot() {
        let (_dir, stager, store) = setup();
        let fp = fingerprint("1");
        store.create_slot(&fp).unwrap();
        let mut blob = stager.stage(&b"x"[..]).unwrap();
        store.commit_original(&mut blob, &fp).unwrap();

        store.discard_slot(&fp);
        assert!(!store.slot_path(&fp).exists());
        // Missing slot is fine.
        store.discard_slot(&fp);
    }

    #[test]
    fn test_sweep_orphans() {
        let (_dir, _, store) = setup();
        let catalog = Catalog::new(Arc::new(Database::in_memory().unwrap()));

        let kept = fingerprint("kept");
        let orphan = fingerprint("orphan");
        store.create_slot(&kept).unwrap();
        store.create_slot(&orphan).unwrap();
        fs::create_dir(store.root().join("not-a-fingerprint")).unwrap();

        catalog
            .insert_if_absent(&NewArtifact {
                location: store.original_path(&kept).to_string_lossy().into_owned(),
                fingerprint: kept,
                size: 1,
                metadata: b"{}".to_vec(),
                ingested_at: Utc::now(),
            })
            .unwrap();

        let report = store.sweep_orphans(&catalog).unwrap();
        assert_eq!(
            report,
            SweepReport {
                scanned: 2,
                removed: 1,
                failed: 0
            }
        );
        assert!(store.slot_path(&kept).exists());
        assert!(!store.slot_path(&orphan).exists());
        assert!(store.root().join("not-a-fingerprint").exists());
    }

    #[test]
    fn test_root_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let plain = ContentStore::new(dir.path().join("final")).unwrap();
        let dotted = ContentStore::new(dir.path().join(".").join("final")).unwrap();
        assert_eq!(plain.root(), dotted.root());
        assert_eq!(plain.root(), fs::canonicalize(dir.path().join("final")).unwrap());
    }

    #[test]
    fn test_sweep_keeps_slots_cataloged_under_another_root_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::new(Arc::new(Database::in_memory().unwrap()));
        let fp = fingerprint("kept");

        // Record written with the literal, non-canonical root spelling.
        let literal_root = dir.path().join(".").join("final");
        fs::create_dir_all(literal_root.join(fp.to_hex())).unwrap();
        catalog
            .insert_if_absent(&NewArtifact {
                location: literal_root
                    .join(fp.to_hex())
                    .join(ORIGINAL_FILE)
                    .to_string_lossy()
                    .into_owned(),
                fingerprint: fp,
                size: 1,
                metadata: b"{}".to_vec(),
                ingested_at: Utc::now(),
            })
            .unwrap();

        let store = ContentStore::new(dir.path().join("final")).unwrap();
        let report = store.sweep_orphans(&catalog).unwrap();
        assert_eq!(report.scanned, 1);
        assert_eq!(report.removed, 0);
        assert!(store.slot_path(&fp).exists());
    }
}
