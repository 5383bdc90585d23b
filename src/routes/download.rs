//! Download Routes
//!
//! Serves a job's output files and its archive, whole or in chunks.
//!
//! Endpoints (relative to the job scope):
//! - GET /files/:file_name - Whole file
//! - GET /files/:file_name/info - Chunking metadata
//! - GET /files/:file_name/chunk/:index - One chunk
//! - POST /archive - (Re)build the job archive
//! - GET /archive, /archive/info, /archive/chunk/:index - Same as files, building the archive on first use

use std::path::{Path as FsPath, PathBuf};

use axum::{
    body::Body,
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

use super::{sanitize_segment, JobPath};
use crate::archive::{build_job_archive, job_archive_path};
use crate::download::{
    chunk_headers, chunk_info, direct_headers, file_stream, read_chunk, should_use_chunked,
    ChunkDownloadInfo,
};
use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::transfer::CHUNK_SIZE_BYTES;
use crate::upload::Owner;

/// Create the download router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/files/:file_name", get(download_file))
        .route("/files/:file_name/info", get(file_info))
        .route("/files/:file_name/chunk/:index", get(file_chunk))
        .route("/archive", get(download_archive).post(rebuild_archive))
        .route("/archive/info", get(archive_info))
        .route("/archive/chunk/:index", get(archive_chunk))
}

// ============================================================================
// Types
// ============================================================================

/// Chunking metadata plus the recommended transfer mode
#[derive(Debug, Serialize, Deserialize)]
pub struct DownloadInfoResponse {
    #[serde(flatten)]
    pub info: ChunkDownloadInfo,
    pub use_chunked: bool,
}

impl From<ChunkDownloadInfo> for DownloadInfoResponse {
    fn from(info: ChunkDownloadInfo) -> Self {
        let use_chunked = should_use_chunked(info.total_size);
        Self { info, use_chunked }
    }
}

#[derive(Debug, Deserialize)]
struct FilePath {
    user_id: String,
    job_id: String,
    file_name: String,
}

#[derive(Debug, Deserialize)]
struct FileChunkPath {
    user_id: String,
    job_id: String,
    file_name: String,
    index: u64,
}

#[derive(Debug, Deserialize)]
struct ArchiveChunkPath {
    user_id: String,
    job_id: String,
    index: u64,
}

fn owner_of(user_id: &str, job_id: &str) -> Result<Owner> {
    JobPath {
        user_id: user_id.to_string(),
        job_id: job_id.to_string(),
    }
    .owner()
}

/// Resolve a file name inside the job's output directory
fn output_file(state: &AppState, user_id: &str, job_id: &str, file_name: &str) -> Result<PathBuf> {
    let owner = owner_of(user_id, job_id)?;
    let file_name = sanitize_segment("file_name", file_name)?;
    Ok(state.output_dir(&owner).join(file_name))
}

// ============================================================================
// File Handlers
// ============================================================================

/// GET /files/:file_name
async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<FilePath>,
) -> Result<Response> {
    let file = output_file(&state, &path.user_id, &path.job_id, &path.file_name)?;
    serve_whole(&file).await
}

/// GET /files/:file_name/info
async fn file_info(
    State(state): State<AppState>,
    Path(path): Path<FilePath>,
) -> Result<Json<DownloadInfoResponse>> {
    let file = output_file(&state, &path.user_id, &path.job_id, &path.file_name)?;
    serve_info(&file).await
}

/// GET /files/:file_name/chunk/:index
async fn file_chunk(
    State(state): State<AppState>,
    Path(path): Path<FileChunkPath>,
) -> Result<Response> {
    let file = output_file(&state, &path.user_id, &path.job_id, &path.file_name)?;
    serve_chunk(&file, path.index).await
}

// ============================================================================
// Archive Handlers
// ============================================================================

/// POST /archive
///
/// Always rebuilds, picking up outputs added since the last build.
async fn rebuild_archive(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
) -> Result<Json<DownloadInfoResponse>> {
    let owner = path.owner()?;
    let output_dir = state.output_dir(&owner);

    let _building = state
        .archive_locks()
        .lock(&job_archive_path(&output_dir, &owner.job_id))
        .await;
    let archive = build_job_archive(&output_dir, &owner.job_id).await?;
    serve_info(&archive).await
}

/// GET /archive
async fn download_archive(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
) -> Result<Response> {
    let archive = ensure_archive(&state, &path.owner()?).await?;
    serve_whole(&archive).await
}

/// GET /archive/info
async fn archive_info(
    State(state): State<AppState>,
    Path(path): Path<JobPath>,
) -> Result<Json<DownloadInfoResponse>> {
    let archive = ensure_archive(&state, &path.owner()?).await?;
    serve_info(&archive).await
}

/// GET /archive/chunk/:index
async fn archive_chunk(
    State(state): State<AppState>,
    Path(path): Path<ArchiveChunkPath>,
) -> Result<Response> {
    let owner = owner_of(&path.user_id, &path.job_id)?;
    let archive = ensure_archive(&state, &owner).await?;
    serve_chunk(&archive, path.index).await
}

/// Reuse the job archive if it exists, otherwise build it
async fn ensure_archive(state: &AppState, owner: &Owner) -> Result<PathBuf> {
    let output_dir = state.output_dir(owner);
    let existing = job_archive_path(&output_dir, &owner.job_id);

    let _building = state.archive_locks().lock(&existing).await;
    if tokio::fs::try_exists(&existing).await? {
        return Ok(existing);
    }

    Ok(build_job_archive(&output_dir, &owner.job_id).await?)
}

// ============================================================================
// Serving
// ============================================================================

/// Stream a whole file without holding it in memory
async fn serve_whole(path: &FsPath) -> Result<Response> {
    let Some(info) = chunk_info(path).await? else {
        return Err(not_found(path));
    };
    let Some((size, stream)) = file_stream(path, CHUNK_SIZE_BYTES).await? else {
        return Err(not_found(path));
    };

    let headers = direct_headers(&info.file_name, size)
        .map_err(|e| AppError::Internal(format!("Invalid header value: {}", e)))?;

    tracing::debug!(path = %path.display(), size = size, "Serving whole file");

    Ok((headers, Body::from_stream(stream)).into_response())
}

async fn serve_info(path: &FsPath) -> Result<Json<DownloadInfoResponse>> {
    match chunk_info(path).await? {
        Some(info) => Ok(Json(info.into())),
        None => Err(not_found(path)),
    }
}

async fn serve_chunk(path: &FsPath, index: u64) -> Result<Response> {
    let Some(info) = chunk_info(path).await? else {
        return Err(not_found(path));
    };

    let Some(data) = read_chunk(path, index, CHUNK_SIZE_BYTES).await? else {
        return Err(AppError::NotFound(format!(
            "Chunk {} of {} ({} chunks)",
            index, info.file_name, info.total_chunks
        )));
    };

    let headers = chunk_headers(&info, index, data.len() as u64)
        .map_err(|e| AppError::Internal(format!("Invalid header value: {}", e)))?;

    tracing::debug!(
        path = %path.display(),
        chunk_index = index,
        total_chunks = info.total_chunks,
        len = data.len(),
        "Serving chunk"
    );

    Ok((headers, data).into_response())
}

fn not_found(path: &FsPath) -> AppError {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    AppError::NotFound(format!("File {}", name))
}
