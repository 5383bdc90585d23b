//! Chunk upload handling
//!
//! Orchestrates one chunk request: session lookup, consistency check, durable
//! chunk write, receipt, and (for the request that completes the upload)
//! reassembly and teardown.
//!
//! The chunk write and its receipt happen under the session's write guard, so
//! a teardown triggered by another request never deletes the directory
//! underneath them.

use std::path::Path;

use super::chunk_store;
use super::session::SessionManager;
use super::types::{
    ChunkUploadOutcome, ChunkUploadRequest, SessionStatus, UploadError, UploadSession,
};

/// Handle one chunk of a chunked upload.
///
/// Failures are returned as values and never destroy the session, so the same
/// chunk index can be retried: the chunk write overwrites and the receipt is
/// idempotent.
pub async fn handle_chunk_upload(
    sessions: &SessionManager,
    request: &ChunkUploadRequest,
    data: &[u8],
    temp_root: &Path,
    target_dir: &Path,
) -> Result<ChunkUploadOutcome, UploadError> {
    validate_request(request)?;
    let key = request.session_key();

    let session = sessions.create_or_get(request, temp_root).await?;
    check_consistency(&session, request)?;

    let receipt = {
        let _writing = sessions.begin_write(&key).await?;
        chunk_store::write_chunk(&session.temp_dir, request.chunk_index, data).await?;
        sessions.record_chunk(&key, request.chunk_index).await?
    };

    tracing::debug!(
        upload_id = %request.upload_id,
        chunk_index = request.chunk_index,
        chunks_received = receipt.received_chunks.len(),
        total_chunks = receipt.total_chunks,
        duplicate = !receipt.newly_recorded,
        "Chunk received"
    );

    if !receipt.ready_to_assemble {
        return Ok(ChunkUploadOutcome::Received {
            chunk_index: request.chunk_index,
            total_chunks: receipt.total_chunks,
            received_chunks: receipt.received_chunks,
        });
    }

    match chunk_store::assemble(&session, target_dir).await {
        Ok(file) => {
            sessions.destroy(&key).await;
            Ok(ChunkUploadOutcome::Completed(file))
        }
        Err(e) => {
            tracing::error!(
                upload_id = %request.upload_id,
                error = %e,
                "Reassembly failed, session kept for retry"
            );
            sessions.release(&key).await;
            Err(e)
        }
    }
}

fn validate_request(request: &ChunkUploadRequest) -> Result<(), UploadError> {
    if request.total_chunks == 0 {
        return Err(UploadError::InvalidChunk(
            "total_chunks must be at least 1".to_string(),
        ));
    }
    if request.chunk_index >= request.total_chunks {
        return Err(UploadError::InvalidChunk(format!(
            "chunk index {} out of range for {} chunks",
            request.chunk_index, request.total_chunks
        )));
    }
    Ok(())
}

fn check_consistency(
    session: &UploadSession,
    request: &ChunkUploadRequest,
) -> Result<(), UploadError> {
    if session.file_name != request.file_name {
        return Err(UploadError::SessionMismatch {
            upload_id: request.upload_id.clone(),
            detail: format!(
                "file_name {:?} != {:?}",
                request.file_name, session.file_name
            ),
        });
    }
    if session.total_chunks != request.total_chunks {
        return Err(UploadError::SessionMismatch {
            upload_id: request.upload_id.clone(),
            detail: format!(
                "total_chunks {} != {}",
                request.total_chunks, session.total_chunks
            ),
        });
    }
    if session.status == SessionStatus::Assembling {
        return Err(UploadError::SessionAssembling(request.upload_id.clone()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================
