//! Artifact catalog over SQLite.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row};
use tracing::debug;

use dcmvault_core::{ArtifactRecord, Fingerprint, Metadata, NewArtifact, VaultError};

use crate::db::Database;

/// Result of a conditional insert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was created with this id.
    Inserted(i64),
    /// A row for the location or fingerprint already existed; this is its id.
    Existing(i64),
}

impl InsertOutcome {
    pub fn id(&self) -> i64 {
        match *self {
            InsertOutcome::Inserted(id) | InsertOutcome::Existing(id) => id,
        }
    }
}

/// Catalog operations used by the pipeline and the HTTP layer.
pub trait CatalogStore: Send + Sync {
    /// Whether a row exists for `location`. Advisory only: a `false` can be
    /// stale by the time the caller acts on it.
    fn exists(&self, location: &str) -> Result<bool, VaultError>;

    /// Whether a row references the slot keyed by `fp`.
    fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, VaultError>;

    /// Insert unless a row for the same location or fingerprint exists.
    /// Atomic.
    fn insert_if_absent(&self, artifact: &NewArtifact) -> Result<InsertOutcome, VaultError>;

    fn get_by_id(&self, id: i64) -> Result<Option<ArtifactRecord>, VaultError>;

    /// One metadata field of a record. `None` when either is missing.
    fn get_tag(&self, id: i64, field: &str) -> Result<Option<String>, VaultError>;

    fn count(&self) -> Result<u64, VaultError>;
}

/// SQLite-backed [`CatalogStore`].
#[derive(Debug, Clone)]
pub struct Catalog {
    db: Arc<Database>,
}

impl Catalog {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }
}

fn catalog_err(context: &str) -> impl Fn(rusqlite::Error) -> VaultError + '_ {
    move |e| VaultError::Catalog(format!("{}: {}", context, e))
}

type RecordRow = (i64, String, String, i64, String, i64);

fn row_to_record(row: &Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ))
}

fn build_record(
    (id, location, fingerprint, size, metadata, ingested_at): RecordRow,
) -> Result<ArtifactRecord, VaultError> {
    let fingerprint = fingerprint.parse::<Fingerprint>().map_err(|e| {
        VaultError::Catalog(format!("Artifact {} has invalid fingerprint: {}", id, e))
    })?;
    let ingested_at = DateTime::<Utc>::from_timestamp(ingested_at, 0).ok_or_else(|| {
        VaultError::Catalog(format!("Artifact {} has invalid timestamp {}", id, ingested_at))
    })?;
    Ok(ArtifactRecord {
        id,
        location,
        fingerprint,
        size: u64::try_from(size)
            .map_err(|_| VaultError::Catalog(format!("Artifact {} has negative size", id)))?,
        metadata: Metadata::from_canonical(metadata.as_bytes())?,
        ingested_at,
    })
}

impl CatalogStore for Catalog {
    fn exists(&self, location: &str) -> Result<bool, VaultError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE location = ?1)",
                rusqlite::params![location],
                |row| row.get(0),
            )
            .map_err(catalog_err("Failed to check catalog"))
        })
    }

    fn has_fingerprint(&self, fp: &Fingerprint) -> Result<bool, VaultError> {
        self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM artifacts WHERE fingerprint = ?1)",
                rusqlite::params![fp.to_hex()],
                |row| row.get(0),
            )
            .map_err(catalog_err("Failed to look up fingerprint"))
        })
    }

    fn insert_if_absent(&self, artifact: &NewArtifact) -> Result<InsertOutcome, VaultError> {
        let metadata = std::str::from_utf8(&artifact.metadata)
            .map_err(|e| VaultError::Serialization(format!("Metadata is not UTF-8: {}", e)))?;
        let size = i64::try_from(artifact.size)
            .map_err(|_| VaultError::Catalog(format!("Size {} out of range", artifact.size)))?;

        self.db.with_conn(|conn| {
            let inserted: Option<i64> = conn
                .query_row(
                    "INSERT INTO artifacts (location, fingerprint, size, metadata, ingested_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)
                     ON CONFLICT DO NOTHING
                     RETURNING id",
                    rusqlite::params![
                        artifact.location,
                        artifact.fingerprint.to_hex(),
                        size,
                        metadata,
                        artifact.ingested_at.timestamp(),
                    ],
                    |row| row.get(0),
                )
                .optional()
                .map_err(catalog_err("Failed to insert artifact"))?;

            if let Some(id) = inserted {
                debug!(id, location = %artifact.location, "Artifact cataloged");
                return Ok(InsertOutcome::Inserted(id));
            }

            let existing: i64 = conn
                .query_row(
                    "SELECT id FROM artifacts WHERE location = ?1 OR fingerprint = ?2 LIMIT 1",
                    rusqlite::params![artifact.location, artifact.fingerprint.to_hex()],
                    |row| row.get(0),
                )
                .map_err(catalog_err("Failed to read existing artifact"))?;
            debug!(id = existing, location = %artifact.location, "Artifact already cataloged");
            Ok(InsertOutcome::Existing(existing))
        })
    }

    fn get_by_id(&self, id: i64) -> Result<Option<ArtifactRecord>, VaultError> {
        let row = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT id, location, fingerprint, size, metadata, ingested_at
                 FROM artifacts WHERE id = ?1",
                rusqlite::params![id],
                row_to_record,
            )
            .optional()
            .map_err(catalog_err("Failed to load artifact"))
        })?;
        row.map(build_record).transpose()
    }

    fn get_tag(&self, id: i64, field: &str) -> Result<Option<String>, VaultError> {
        let metadata: Option<String> = self.db.with_conn(|conn| {
            conn.query_row(
                "SELECT metadata FROM artifacts WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .optional()
            .map_err(catalog_err("Failed to load metadata"))
        })?;

        match metadata {
            Some(json) => {
                let metadata = Metadata::from_canonical(json.as_bytes())?;
                Ok(metadata.get(field).map(str::to_string))
            }
            None => Ok(None),
        }
    }

    fn count(&self) -> Result<u64, VaultError> {
        let count: i64 = self.db.with_conn(|conn| {
            conn.query_row("SELECT COUNT(*) FROM artifacts", [], |row| row.get(0))
                .map_err(catalog_err("Failed to count artifacts"))
        })?;
        Ok(count.max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn catalog() -> Catalog {
        Catalog::new(Arc::new(Database::in_memory().unwrap()))
    }

    fn artifact(location: &str) -> NewArtifact {
        let metadata: Metadata = [("Modality", "CT"), ("PatientID", "123")]
            .into_iter()
            .collect();
        NewArtifact {
            location: location.to_string(),
            fingerprint: Fingerprint::of_canonical(location.as_bytes()),
            size: 2048,
            metadata: metadata.canonical_bytes().unwrap(),
            ingested_at: Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap(),
        }
    }

    #[test]
    fn test_insert_then_existing() {
        let catalog = catalog();
        let first = catalog.insert_if_absent(&artifact("final/a/original.dcm")).unwrap();
        let second = catalog.insert_if_absent(&artifact("final/a/original.dcm")).unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert_eq!(second, InsertOutcome::Existing(first.id()));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_distinct_locations_get_distinct_ids() {
        let catalog = catalog();
        let a = catalog.insert_if_absent(&artifact("final/a/original.dcm")).unwrap();
        let b = catalog.insert_if_absent(&artifact("final/b/original.dcm")).unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(catalog.count().unwrap(), 2);
    }

    #[test]
    fn test_exists() {
        let catalog = catalog();
        assert!(!catalog.exists("final/a/original.dcm").unwrap());
        catalog.insert_if_absent(&artifact("final/a/original.dcm")).unwrap();
        assert!(catalog.exists("final/a/original.dcm").unwrap());
        assert!(!catalog.exists("final/b/original.dcm").unwrap());
    }

    #[test]
    fn test_has_fingerprint() {
        let catalog = catalog();
        let new = artifact("final/a/original.dcm");
        assert!(!catalog.has_fingerprint(&new.fingerprint).unwrap());
        catalog.insert_if_absent(&new).unwrap();
        assert!(catalog.has_fingerprint(&new.fingerprint).unwrap());
        assert!(!catalog
            .has_fingerprint(&artifact("final/b/original.dcm").fingerprint)
            .unwrap());
    }

    #[test]
    fn test_same_fingerprint_other_location_is_existing() {
        let catalog = catalog();
        let first = artifact("/data/final/a/original.dcm");
        let id = catalog.insert_if_absent(&first).unwrap().id();

        let mut respelled = artifact("/data/./final/a/original.dcm");
        respelled.fingerprint = first.fingerprint;
        assert_eq!(
            catalog.insert_if_absent(&respelled).unwrap(),
            InsertOutcome::Existing(id)
        );
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_get_by_id() {
        let catalog = catalog();
        let new = artifact("final/a/original.dcm");
        let id = catalog.insert_if_absent(&new).unwrap().id();

        let record = catalog.get_by_id(id).unwrap().unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.location, "final/a/original.dcm");
        assert_eq!(record.fingerprint, new.fingerprint);
        assert_eq!(record.size, 2048);
        assert_eq!(record.ingested_at, new.ingested_at);
        assert_eq!(record.metadata.get("Modality"), Some("CT"));

        assert!(catalog.get_by_id(id + 1).unwrap().is_none());
    }

    #[test]
    fn test_metadata_stored_verbatim() {
        let catalog = catalog();
        let new = artifact("final/a/original.dcm");
        let id = catalog.insert_if_absent(&new).unwrap().id();

        let stored: String = catalog
            .db
            .with_conn(|conn| {
                conn.query_row(
                    "SELECT metadata FROM artifacts WHERE id = ?1",
                    [id],
                    |row| row.get(0),
                )
                .map_err(|e| VaultError::Catalog(e.to_string()))
            })
            .unwrap();
        assert_eq!(stored.as_bytes(), new.metadata.as_slice());
    }

    #[test]
    fn test_get_tag() {
        let catalog = catalog();
        let id = catalog
            .insert_if_absent(&artifact("final/a/original.dcm"))
            .unwrap()
            .id();

        assert_eq!(catalog.get_tag(id, "Modality").unwrap().as_deref(), Some("CT"));
        assert_eq!(catalog.get_tag(id, "StudyDate").unwrap(), None);
        assert_eq!(catalog.get_tag(id + 100, "Modality").unwrap(), None);
    }

    #[test]
    fn test_concurrent_inserts_converge() {
        let catalog = catalog();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let catalog = catalog.clone();
                std::thread::spawn(move || {
                    catalog
                        .insert_if_absent(&artifact("final/same/original.dcm"))
                        .unwrap()
                })
            })
            .collect();

        let outcomes: Vec<InsertOutcome> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let inserted = outcomes
            .iter()
            .filter(|o| matches!(o, InsertOutcome::Inserted(_)))
            .count();
        assert_eq!(inserted, 1);
        let id = outcomes[0].id();
        assert!(outcomes.iter().all(|o| o.id() == id));
        assert_eq!(catalog.count().unwrap(), 1);
    }

    #[test]
    fn test_rejects_invalid_metadata() {
        let catalog = catalog();
        let mut new = artifact("final/a/original.dcm");
        new.metadata = b"not json".to_vec();
        assert!(catalog.insert_if_absent(&new).is_err());
        assert_eq!(catalog.count().unwrap(), 0);
    }
}
