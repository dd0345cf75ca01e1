//! dcmvault API crate - axum HTTP surface over the ingestion pipeline.
//!
//! Uploads go through the blocking pipeline on tokio's blocking pool;
//! lookups read the catalog and stream previews from the content store.

pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
