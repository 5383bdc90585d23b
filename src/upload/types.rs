//! Upload types for chunked and direct uploads

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Owner
// ============================================================================

/// User/job pair that namespaces files on disk.
///
/// Identity is resolved before a request reaches this crate; both values are
/// treated as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Owner {
    pub user_id: String,
    pub job_id: String,
}

impl Owner {
    pub fn new(user_id: impl Into<String>, job_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            job_id: job_id.into(),
        }
    }
}

/// Registry key of an upload session.
///
/// Upload IDs are only unique per owner, so the same ID sent by two owners
/// names two independent sessions.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub owner: Owner,
    pub upload_id: String,
}

impl SessionKey {
    pub fn new(owner: Owner, upload_id: impl Into<String>) -> Self {
        Self {
            owner,
            upload_id: upload_id.into(),
        }
    }
}

// ============================================================================
// Chunk Upload Types
// ============================================================================

/// Metadata sent with every chunk of a chunked upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadRequest {
    /// Client-supplied upload ID, unique per attempt
    pub upload_id: String,

    /// 0-based index of this chunk
    pub chunk_index: u32,

    /// Total chunk count declared by the client
    pub total_chunks: u32,

    /// Target file name (already sanitized)
    pub file_name: String,

    /// Declared size of the whole file
    pub total_size: u64,

    /// Owner of the upload
    pub owner: Owner,
}

impl ChunkUploadRequest {
    /// Key of the session this chunk belongs to
    pub fn session_key(&self) -> SessionKey {
        SessionKey::new(self.owner.clone(), self.upload_id.clone())
    }
}

/// Declared vs. actual size of a reassembled file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeMismatch {
    pub declared: u64,
    pub actual: u64,
}

/// A file reassembled from a completed session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssembledFile {
    /// Final on-disk path
    pub path: PathBuf,

    /// Actual size of the written file
    pub size: u64,

    /// Hex SHA-256 of the written bytes
    pub sha256: String,

    /// Set when the written size differs from the declared one
    pub size_mismatch: Option<SizeMismatch>,
}

/// Result of handling one chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkUploadOutcome {
    /// Chunk stored, upload still incomplete
    Received {
        chunk_index: u32,
        total_chunks: u32,
        received_chunks: Vec<u32>,
    },
    /// Last chunk stored, file reassembled and session torn down
    Completed(AssembledFile),
}

/// Wire response for a chunk upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkUploadResponse {
    pub success: bool,
    pub message: String,

    /// Indices received so far
    pub received_chunks: Vec<u32>,

    /// Whether all chunks have arrived and the file was assembled
    pub completed: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_mismatch: Option<SizeMismatch>,
}

impl From<ChunkUploadOutcome> for ChunkUploadResponse {
    fn from(outcome: ChunkUploadOutcome) -> Self {
        match outcome {
            ChunkUploadOutcome::Received {
                chunk_index,
                total_chunks,
                received_chunks,
            } => Self {
                success: true,
                message: format!("Chunk {}/{} received.", chunk_index + 1, total_chunks),
                received_chunks,
                completed: false,
                file_path: None,
                size: None,
                sha256: None,
                size_mismatch: None,
            },
            ChunkUploadOutcome::Completed(file) => Self {
                success: true,
                message: "Upload completed and merged successfully.".to_string(),
                // The session is gone at this point; every index was received
                received_chunks: Vec::new(),
                completed: true,
                file_path: Some(file.path.to_string_lossy().into_owned()),
                size: Some(file.size),
                sha256: Some(file.sha256),
                size_mismatch: file.size_mismatch,
            },
        }
    }
}

/// Wire response for a direct upload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectUploadResponse {
    pub success: bool,
    pub message: String,
    pub file_paths: Vec<String>,
}

// ============================================================================
// Session Types
// ============================================================================

/// Upload session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadSession {
    /// Client-supplied upload ID
    pub upload_id: String,

    /// Owner of the upload
    pub owner: Owner,

    /// Target file name
    pub file_name: String,

    /// Declared total size in bytes (advisory)
    pub total_size: u64,

    /// Declared chunk count (authoritative)
    pub total_chunks: u32,

    /// Indices of chunks that have been received
    pub received_chunks: BTreeSet<u32>,

    /// Session creation time
    pub created_at: DateTime<Utc>,

    /// Directory holding this session's chunk files
    pub temp_dir: PathBuf,

    /// Current status
    pub status: SessionStatus,
}

impl UploadSession {
    /// Registry key of this session
    pub fn key(&self) -> SessionKey {
        SessionKey::new(self.owner.clone(), self.upload_id.clone())
    }

    /// Check if all chunks have been received
    pub fn is_complete(&self) -> bool {
        self.received_chunks.len() == self.total_chunks as usize
    }

    /// Get indices of chunks that still need to be uploaded
    pub fn missing_chunks(&self) -> Vec<u32> {
        (0..self.total_chunks)
            .filter(|i| !self.received_chunks.contains(i))
            .collect()
    }

    /// Calculate progress percentage
    pub fn progress(&self) -> f64 {
        (self.received_chunks.len() as f64 / self.total_chunks.max(1) as f64) * 100.0
    }
}

/// Session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Waiting for chunks
    Receiving,
    /// All chunks received, one request is reassembling the file
    Assembling,
}

/// Outcome of recording a chunk in the session store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    /// False if this index had already been recorded
    pub newly_recorded: bool,

    /// Indices received so far, ascending
    pub received_chunks: Vec<u32>,

    /// Declared chunk count
    pub total_chunks: u32,

    /// True for exactly one caller: the one that observed completion and
    /// moved the session to `Assembling`
    pub ready_to_assemble: bool,
}

// ============================================================================
// Error Types
// ============================================================================

/// Upload error types
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Upload session not found: {0}")]
    SessionNotFound(String),

    #[error("Session mismatch for {upload_id}: inconsistent upload parameters ({detail})")]
    SessionMismatch { upload_id: String, detail: String },

    #[error("Upload {0} is already being assembled")]
    SessionAssembling(String),

    #[error("Invalid chunk: {0}")]
    InvalidChunk(String),

    #[error("Missing chunks: {0:?}")]
    MissingChunks(Vec<u32>),

    #[error("Storage error: {context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl UploadError {
    /// Wrap an I/O error with what was being attempted
    pub fn storage(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Storage {
            context: context.into(),
            source,
        }
    }

    /// Get HTTP status code for this error
    pub fn status_code(&self) -> axum::http::StatusCode {
        use axum::http::StatusCode;
        match self {
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::SessionMismatch { .. } => StatusCode::CONFLICT,
            Self::SessionAssembling(_) => StatusCode::CONFLICT,
            Self::InvalidChunk(_) => StatusCode::BAD_REQUEST,
            Self::MissingChunks(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "SESSION_NOT_FOUND",
            Self::SessionMismatch { .. } => "SESSION_MISMATCH",
            Self::SessionAssembling(_) => "SESSION_ASSEMBLING",
            Self::InvalidChunk(_) => "INVALID_CHUNK",
            Self::MissingChunks(_) => "MISSING_CHUNKS",
            Self::Storage { .. } => "STORAGE_ERROR",
        }
    }
}
