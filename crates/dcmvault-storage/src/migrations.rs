//! Database schema migrations.

use rusqlite::Connection;
use tracing::info;

use dcmvault_core::VaultError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), VaultError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| VaultError::Catalog(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| VaultError::Catalog(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: artifacts");
    }

    Ok(())
}

/// Version 1: the artifacts catalog.
///
/// `location` is the path of the stored original and `fingerprint` the hex
/// slot key. Both are unique, so a second insert for the same slot is a
/// no-op however the content root was spelled.
fn apply_v1(conn: &Connection) -> Result<(), VaultError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS artifacts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            location    TEXT NOT NULL UNIQUE,
            fingerprint TEXT NOT NULL UNIQUE CHECK (length(fingerprint) = 64),
            size        INTEGER NOT NULL CHECK (size >= 0),
            metadata    TEXT NOT NULL CHECK (json_valid(metadata)),
            ingested_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_artifacts_ingested_at
            ON artifacts (ingested_at DESC);

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'artifacts');
        ",
    )
    .map_err(|e| VaultError::Catalog(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
