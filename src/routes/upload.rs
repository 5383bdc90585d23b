//! Upload Routes
//!
//! Endpoints (relative to the job scope):
//! - POST /upload - Direct upload of one or more multipart file parts
//! - POST /upload/chunk?upload_id&chunk_index&total_chunks&file_name&total_size - Upload a chunk (raw body)
//! - GET /upload/:upload_id - Get session status
//! - DELETE /upload/:upload_id - Cancel upload

use axum::{
    body::Bytes,
    extract::{Multipart, Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{sanitize_segment, JobPath};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::upload::{
    handle_chunk_upload, handle_direct_upload, ChunkUploadRequest, ChunkUploadResponse,
    DirectUploadResponse, Owner, SessionKey, SessionStatus, UploadError, UploadSession,
};

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(direct_upload))
        .route("/upload/chunk", post(upload_chunk))
        .route("/upload/:upload_id", get(get_session).delete(cancel_session))
}

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ChunkQuery {
    pub upload_id: String,
    pub chunk_index: u32,
    pub total_chunks: u32,
    pub file_name: String,
    pub total_size: u64,
}

#[derive(Debug, Deserialize)]
struct UploadPath {
    user_id: String,
    job_id: String,
    upload_id: String,
}

impl UploadPath {
    fn owner(&self) -> Result<Owner> {
        JobPath {
            user_id: self.user_id.clone(),
            job_id: self.job_id.clone(),
        }
        .owner()
    }
}

/// Progress of an in-flight chunked upload
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionStatusResponse {
    pub upload_id: String,
    pub file_name: String,
    pub total_size: u64,
    pub total_chunks: u32,
    pub received_chunks: Vec<u32>,
    pub missing_chunks: Vec<u32>,
    pub progress: f64,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
}

impl From<&UploadSession> for SessionStatusResponse {
    fn from(session: &UploadSession) -> Self {
        Self {
            upload_id: session.upload_id.clone(),
            file_name: session.file_name.clone(),
            total_size: session.total_size,
            total_chunks: session.total_chunks,
            received_chunks: session.received_chunks.iter().copied().collect(),
            missing_chunks: session.missing_chunks(),
            progress: session.progress(),
            status: session.status,
            created_at: session.created_at,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CancelResponse {
    pub success: bool,
    pub message: String,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /upload
///
/// Write every multipart part that carries a file name into the job's upload
/// directory. Meant for payloads at or under the chunk threshold.
async fn direct_upload(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
    mut multipart: Multipart,
) -> Result<Json<DirectUploadResponse>> {
    let owner = path.owner()?;
    let target_dir = state.upload_dir(&owner);
    let mut file_paths = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        tracing::warn!("Failed to read multipart field: {}", e);
        AppError::BadRequest(format!("Failed to read upload: {}", e))
    })? {
        let Some(file_name) = field.file_name().map(str::to_string) else {
            continue;
        };
        sanitize_segment("file_name", &file_name)?;

        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(format!("Failed to read file data: {}", e)))?;

        let written = handle_direct_upload(&target_dir, &file_name, &data).await?;
        file_paths.push(written.to_string_lossy().into_owned());
    }

    if file_paths.is_empty() {
        return Err(AppError::BadRequest("No files provided".to_string()));
    }

    Ok(Json(DirectUploadResponse {
        success: true,
        message: format!("{} file(s) uploaded successfully.", file_paths.len()),
        file_paths,
    }))
}

/// POST /upload/chunk
///
/// Upload a single chunk. Chunk metadata is in the query string and the chunk
/// bytes are the raw request body.
async fn upload_chunk(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
    Query(query): Query<ChunkQuery>,
    body: Bytes,
) -> Result<Json<ChunkUploadResponse>> {
    let owner = path.owner()?;
    sanitize_segment("upload_id", &query.upload_id)?;
    sanitize_segment("file_name", &query.file_name)?;

    let temp_root = state.chunk_temp_root(&owner);
    let target_dir = state.upload_dir(&owner);

    let request = ChunkUploadRequest {
        upload_id: query.upload_id,
        chunk_index: query.chunk_index,
        total_chunks: query.total_chunks,
        file_name: query.file_name,
        total_size: query.total_size,
        owner,
    };

    let outcome =
        handle_chunk_upload(state.sessions(), &request, &body, &temp_root, &target_dir).await?;

    Ok(Json(outcome.into()))
}

/// GET /upload/:upload_id
async fn get_session(
    State(state): State<AppState>,
    Path(path): Path<UploadPath>,
) -> Result<Json<SessionStatusResponse>> {
    let session = find_owned_session(&state, &path).await?;
    Ok(Json(SessionStatusResponse::from(&session)))
}

/// DELETE /upload/:upload_id
///
/// Cancel an upload and delete its received chunks.
async fn cancel_session(
    State(state): State<AppState>,
    Path(path): Path<UploadPath>,
) -> Result<Json<CancelResponse>> {
    let session = find_owned_session(&state, &path).await?;

    if session.status == SessionStatus::Assembling {
        return Err(UploadError::SessionAssembling(session.upload_id).into());
    }

    if !state.sessions().destroy(&session.key()).await {
        return Err(AppError::NotFound(format!("Upload session {}", session.upload_id)));
    }

    tracing::info!(upload_id = %session.upload_id, "Upload cancelled");

    Ok(Json(CancelResponse {
        success: true,
        message: "Upload cancelled.".to_string(),
    }))
}

/// Look up a session within the caller's user and job scope
async fn find_owned_session(state: &AppState, path: &UploadPath) -> Result<UploadSession> {
    let owner = path.owner()?;
    sanitize_segment("upload_id", &path.upload_id)?;

    state
        .sessions()
        .get(&SessionKey::new(owner, path.upload_id.as_str()))
        .await
        .ok_or_else(|| AppError::NotFound(format!("Upload session {}", path.upload_id)))
}
