//! Upload Session Manager
//!
//! Manages chunked upload sessions with:
//! - In-memory registry behind a single lock, keyed by owner and upload ID
//! - Exactly-once hand-off to reassembly
//! - Retired upload IDs so late chunks never reopen a finished upload
//! - A per-session directory lock: chunk writes share it, teardown takes it
//!   exclusively before deleting the session directory
//! - Background sweep of abandoned sessions

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{OwnedRwLockReadGuard, RwLock};

use super::types::{
    ChunkReceipt, ChunkUploadRequest, SessionKey, SessionStatus, UploadError, UploadSession,
};
use crate::transfer::{CHUNK_TEMP_DIR, SWEEP_INTERVAL, UPLOAD_SESSION_TIMEOUT};

/// Held while a chunk is written into a session directory
pub type ChunkWriteGuard = OwnedRwLockReadGuard<()>;

// ============================================================================
// Session Manager
// ============================================================================

/// Manages upload sessions
#[derive(Clone, Default)]
pub struct SessionManager {
    inner: Arc<RwLock<Registry>>,
}

#[derive(Default)]
struct Registry {
    /// Active sessions
    sessions: HashMap<SessionKey, Entry>,

    /// Destroyed sessions and when they were retired
    retired: HashMap<SessionKey, DateTime<Utc>>,
}

struct Entry {
    session: UploadSession,
    dir_lock: Arc<RwLock<()>>,
}

impl Registry {
    fn retire(&mut self, key: &SessionKey) -> Option<Entry> {
        let entry = self.sessions.remove(key)?;
        self.retired.insert(key.clone(), Utc::now());
        Some(entry)
    }
}

fn not_found(key: &SessionKey) -> UploadError {
    UploadError::SessionNotFound(key.upload_id.clone())
}

impl SessionManager {
    /// Create an empty session manager
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Session Lifecycle
    // ========================================================================

    /// Return the session for the request's owner and upload ID, creating it
    /// and its temp directory `temp_root/chunks_temp/{job_id}/{upload_id}` on
    /// first contact.
    ///
    /// An existing session is returned unchanged, even if the request
    /// disagrees with it; consistency is checked by the caller.
    pub async fn create_or_get(
        &self,
        request: &ChunkUploadRequest,
        temp_root: &Path,
    ) -> Result<UploadSession, UploadError> {
        let key = request.session_key();

        // Held across directory creation so concurrent first contacts agree
        let mut registry = self.inner.write().await;

        if let Some(entry) = registry.sessions.get(&key) {
            return Ok(entry.session.clone());
        }

        if registry.retired.contains_key(&key) {
            return Err(not_found(&key));
        }

        let temp_dir = temp_root
            .join(CHUNK_TEMP_DIR)
            .join(&request.owner.job_id)
            .join(&request.upload_id);
        tokio::fs::create_dir_all(&temp_dir).await.map_err(|e| {
            UploadError::storage(format!("creating session dir {}", temp_dir.display()), e)
        })?;

        let session = UploadSession {
            upload_id: request.upload_id.clone(),
            owner: request.owner.clone(),
            file_name: request.file_name.clone(),
            total_size: request.total_size,
            total_chunks: request.total_chunks,
            received_chunks: Default::default(),
            created_at: Utc::now(),
            temp_dir,
            status: SessionStatus::Receiving,
        };

        registry.sessions.insert(
            key,
            Entry {
                session: session.clone(),
                dir_lock: Arc::new(RwLock::new(())),
            },
        );

        tracing::info!(
            upload_id = %request.upload_id,
            user_id = %request.owner.user_id,
            job_id = %request.owner.job_id,
            file_name = %request.file_name,
            total_size = request.total_size,
            total_chunks = request.total_chunks,
            "Created upload session"
        );

        Ok(session)
    }

    /// Get a session by key
    pub async fn get(&self, key: &SessionKey) -> Option<UploadSession> {
        let registry = self.inner.read().await;
        registry.sessions.get(key).map(|entry| entry.session.clone())
    }

    /// Reserve a session directory for writing a chunk.
    ///
    /// While the guard is alive the directory is not deleted. Fails with
    /// `SessionNotFound` if the session is gone by the time the guard is
    /// acquired.
    pub async fn begin_write(&self, key: &SessionKey) -> Result<ChunkWriteGuard, UploadError> {
        let dir_lock = {
            let registry = self.inner.read().await;
            registry
                .sessions
                .get(key)
                .map(|entry| entry.dir_lock.clone())
                .ok_or_else(|| not_found(key))?
        };

        let guard = dir_lock.read_owned().await;

        // Teardown retires the session before taking the lock exclusively
        if !self.inner.read().await.sessions.contains_key(key) {
            return Err(not_found(key));
        }

        Ok(guard)
    }

    /// Mark a chunk as received. Recording the same index twice is a no-op.
    pub async fn record_chunk(
        &self,
        key: &SessionKey,
        chunk_index: u32,
    ) -> Result<ChunkReceipt, UploadError> {
        let mut registry = self.inner.write().await;

        let session = &mut registry
            .sessions
            .get_mut(key)
            .ok_or_else(|| not_found(key))?
            .session;

        let newly_recorded = session.received_chunks.insert(chunk_index);

        let ready_to_assemble =
            session.is_complete() && session.status == SessionStatus::Receiving;
        if ready_to_assemble {
            session.status = SessionStatus::Assembling;
        }

        Ok(ChunkReceipt {
            newly_recorded,
            received_chunks: session.received_chunks.iter().copied().collect(),
            total_chunks: session.total_chunks,
            ready_to_assemble,
        })
    }

    /// Return an assembling session to receiving after a failed reassembly
    pub async fn release(&self, key: &SessionKey) -> bool {
        let mut registry = self.inner.write().await;
        match registry.sessions.get_mut(key) {
            Some(entry) => {
                entry.session.status = SessionStatus::Receiving;
                true
            }
            None => false,
        }
    }

    /// Check if all chunks of a session have been received
    pub async fn is_complete(&self, key: &SessionKey) -> bool {
        let registry = self.inner.read().await;
        registry
            .sessions
            .get(key)
            .map(|entry| entry.session.is_complete())
            .unwrap_or(false)
    }

    /// Remove a session, retire its key, and delete its temp directory once
    /// in-flight chunk writes have finished.
    ///
    /// Returns false if the session was already gone.
    pub async fn destroy(&self, key: &SessionKey) -> bool {
        let entry = {
            let mut registry = self.inner.write().await;
            registry.retire(key)
        };

        match entry {
            Some(entry) => {
                self.remove_session_dir(&entry).await;
                tracing::debug!(
                    upload_id = %key.upload_id,
                    file_name = %entry.session.file_name,
                    "Destroyed upload session"
                );
                true
            }
            None => false,
        }
    }

    async fn remove_session_dir(&self, entry: &Entry) {
        let _exclusive = entry.dir_lock.write().await;
        remove_temp_dir(&entry.session.temp_dir).await;

        // Drop the per-job directory once empty. Under the registry lock so
        // it cannot race a first contact creating a sibling session.
        if let Some(job_dir) = entry.session.temp_dir.parent() {
            let _registry = self.inner.write().await;
            let _ = tokio::fs::remove_dir(job_dir).await;
        }
    }

    // ========================================================================
    // Query Methods
    // ========================================================================

    /// Get session count
    pub async fn session_count(&self) -> usize {
        let registry = self.inner.read().await;
        registry.sessions.len()
    }

    // ========================================================================
    // Cleanup
    // ========================================================================

    /// Destroy sessions older than the inactivity timeout
    ///
    /// Returns the number of sessions cleaned up
    pub async fn sweep_expired(&self) -> usize {
        let timeout = chrono::Duration::seconds(UPLOAD_SESSION_TIMEOUT.as_secs() as i64);
        self.sweep_created_before(Utc::now() - timeout).await
    }

    /// Destroy every session created before `cutoff`, complete or not, except
    /// one that is being assembled. Retired keys older than `cutoff` are
    /// forgotten.
    pub async fn sweep_created_before(&self, cutoff: DateTime<Utc>) -> usize {
        let stale: Vec<Entry> = {
            let mut registry = self.inner.write().await;

            let stale_keys: Vec<SessionKey> = registry
                .sessions
                .iter()
                .filter(|(_, entry)| {
                    entry.session.created_at < cutoff
                        && entry.session.status == SessionStatus::Receiving
                })
                .map(|(key, _)| key.clone())
                .collect();

            registry.retired.retain(|_, retired_at| *retired_at >= cutoff);

            stale_keys
                .iter()
                .filter_map(|key| registry.retire(key))
                .collect()
        };

        let count = stale.len();
        futures::future::join_all(stale.iter().map(|entry| self.remove_session_dir(entry))).await;

        for entry in &stale {
            tracing::debug!(
                upload_id = %entry.session.upload_id,
                file_name = %entry.session.file_name,
                received = entry.session.received_chunks.len(),
                total = entry.session.total_chunks,
                "Cleaned up expired session"
            );
        }

        if count > 0 {
            tracing::info!(count = count, "Cleaned up expired upload sessions");
        }

        count
    }

    /// Start background cleanup task
    pub fn start_sweep_task(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);

            loop {
                interval.tick().await;
                self.sweep_expired().await;
            }
        })
    }
}

async fn remove_temp_dir(path: &Path) {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Failed to remove session dir");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
