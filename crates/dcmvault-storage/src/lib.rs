//! dcmvault storage crate - staging area, content slots, SQLite catalog.
//!
//! Three stores back the ingestion pipeline:
//!
//! - [`Stager`] writes incoming bytes to uniquely named temporary files.
//! - [`ContentStore`] owns one directory per fingerprint holding the
//!   original and its preview. Creating that directory is the atomic claim
//!   that decides which of several concurrent uploads wins.
//! - [`Catalog`] records committed artifacts in a WAL-mode SQLite database,
//!   unique on location.

pub mod catalog;
pub mod content;
pub mod db;
pub mod migrations;
pub mod staging;

pub use catalog::{Catalog, CatalogStore, InsertOutcome};
pub use content::{ContentStore, SlotClaim, SlotStore, SweepReport};
pub use db::Database;
pub use staging::{StagedBlob, Stager};
