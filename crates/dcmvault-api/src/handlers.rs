//! Route handler functions for all API endpoints.

use std::io;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::multipart::MultipartError;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::io::{ReaderStream, StreamReader, SyncIoBridge};
use tracing::{error, info};

use dcmvault_core::ArtifactRecord;
use dcmvault_ingest::{AbortSignal, IngestOutcome};
use dcmvault_storage::{CatalogStore, ContentStore};

use crate::error::ApiError;
use crate::state::AppState;

/// Multipart field carrying the uploaded file.
pub const UPLOAD_FIELD: &str = "image";

/// Body chunks buffered between the request and the staging writer.
const UPLOAD_CHANNEL_CHUNKS: usize = 8;

// =============================================================================
// Request and response types
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct HeaderParams {
    pub tag: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub file_id: i64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TagResponse {
    pub tag: String,
    pub value: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub total_artifacts: u64,
}

fn parse_id(raw: &str) -> Result<i64, ApiError> {
    raw.parse::<i64>()
        .map_err(|_| ApiError::BadRequest(format!("Invalid record id: {}", raw)))
}

fn load_record(state: &AppState, id: i64) -> Result<ArtifactRecord, ApiError> {
    state
        .catalog
        .get_by_id(id)?
        .ok_or_else(|| ApiError::NotFound(format!("Record {} not found", id)))
}

// =============================================================================
// Upload
// =============================================================================

/// POST /api/v1/images - ingest one DICOM file.
///
/// The file field is streamed chunk by chunk into the pipeline's staging
/// file; the body is never held in memory.
pub async fn upload(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let malformed = |e: MultipartError| ApiError::BadRequest(format!("Malformed upload: {}", e));

    let mut field = loop {
        let field = multipart.next_field().await.map_err(malformed)?.ok_or_else(|| {
            ApiError::BadRequest(format!("Missing form field '{}'", UPLOAD_FIELD))
        })?;
        if field.name() == Some(UPLOAD_FIELD) {
            break field;
        }
    };
    let filename = field.file_name().unwrap_or_default().to_string();

    let (tx, rx) = mpsc::channel::<io::Result<Bytes>>(UPLOAD_CHANNEL_CHUNKS);
    let reader = SyncIoBridge::new(StreamReader::new(ReceiverStream::new(rx)));

    // Declared after `tx` so that dropping this future (client disconnect)
    // trips the signal before the reader can see end of input. The
    // pipeline then stops at its next state boundary and cleans up.
    let signal = AbortSignal::new();
    let guard = signal.guard();
    let pipeline = Arc::clone(&state.pipeline);
    let task =
        tokio::task::spawn_blocking(move || pipeline.ingest_with_signal(reader, &signal));

    let mut body_error = None;
    loop {
        match field.chunk().await {
            Ok(Some(chunk)) => {
                // A closed channel means the pipeline stopped reading; its
                // result says why.
                if tx.send(Ok(chunk)).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                let _ = tx
                    .send(Err(io::Error::new(io::ErrorKind::InvalidData, e.to_string())))
                    .await;
                body_error = Some(e);
                break;
            }
        }
    }
    drop(tx);

    let outcome = task
        .await
        .map_err(|e| ApiError::Internal(format!("Ingest task failed: {}", e)))?;
    guard.disarm();

    if let Some(e) = body_error {
        return Err(malformed(e));
    }

    match outcome? {
        IngestOutcome::Created { id, .. } => {
            info!(id, filename = %filename, "Upload stored");
            Ok((
                StatusCode::CREATED,
                Json(UploadResponse {
                    message: "file uploaded successfully".to_string(),
                    filename,
                    file_id: id,
                }),
            ))
        }
        IngestOutcome::Duplicate { .. } => Err(ApiError::Conflict(
            "file with identical content already exists".to_string(),
        )),
    }
}

// =============================================================================
// Lookups
// =============================================================================

/// GET /api/v1/dicom/{id} - the catalog record.
pub async fn record(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ArtifactRecord>, ApiError> {
    let id = parse_id(&id)?;
    Ok(Json(load_record(&state, id)?))
}

/// GET /api/v1/dicom/{id}/header?tag=Name - one metadata field.
pub async fn header(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HeaderParams>,
) -> Result<Json<TagResponse>, ApiError> {
    let id = parse_id(&id)?;
    let tag = params
        .tag
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::BadRequest("Missing query parameter 'tag'".to_string()))?;

    match state.catalog.get_tag(id, &tag)? {
        Some(value) => Ok(Json(TagResponse { tag, value })),
        None => {
            load_record(&state, id)?;
            Err(ApiError::NotFound(format!("Tag {} not found", tag)))
        }
    }
}

/// GET /api/v1/dicom/{id}/preview - stream the PNG preview.
pub async fn preview(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let id = parse_id(&id)?;
    let record = load_record(&state, id)?;
    let path = ContentStore::preview_for_location(&record.location);

    let file = tokio::fs::File::open(&path).await.map_err(|e| {
        ApiError::Internal(format!(
            "Preview for record {} unavailable at {}: {}",
            id,
            path.display(),
            e
        ))
    })?;
    let len = file
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("Failed to stat preview: {}", e)))?
        .len();

    // Headers are sent before the body; a read error past this point can
    // only be logged.
    let stream = ReaderStream::new(file).map(move |chunk| {
        if let Err(e) = &chunk {
            error!(id, error = %e, "Preview stream failed");
        }
        chunk
    });

    Response::builder()
        .header(header::CONTENT_TYPE, "image/png")
        .header(header::CONTENT_LENGTH, len)
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("Failed to build response: {}", e)))
}

// =============================================================================
// Health
// =============================================================================

/// GET /health
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        total_artifacts: state.catalog.count()?,
    }))
}

/// Fallback for unknown routes.
pub async fn not_found() -> impl IntoResponse {
    ApiError::NotFound("No such route".to_string())
}
