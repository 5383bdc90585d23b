//! Application state management

use std::path::PathBuf;
use std::sync::Arc;

use crate::archive::ArchiveLocks;
use crate::config::Config;
use crate::upload::{Owner, SessionManager};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    sessions: SessionManager,
    archive_locks: ArchiveLocks,
}

impl AppState {
    /// Create a new application state with its own session store
    pub fn new(config: Config) -> Self {
        Self::with_sessions(config, SessionManager::new())
    }

    /// Create application state around an existing session store
    pub fn with_sessions(config: Config, sessions: SessionManager) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                sessions,
                archive_locks: ArchiveLocks::new(),
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session store
    pub fn sessions(&self) -> &SessionManager {
        &self.inner.sessions
    }

    /// Per-path locks around job archive builds
    pub fn archive_locks(&self) -> &ArchiveLocks {
        &self.inner.archive_locks
    }

    // ========================================================================
    // On-disk layout
    // ========================================================================

    /// Root under which a user's chunk sessions live (the session store adds
    /// `chunks_temp/{job_id}/{upload_id}`)
    pub fn chunk_temp_root(&self, owner: &Owner) -> PathBuf {
        self.inner.config.storage.uploads_dir.join(&owner.user_id)
    }

    /// Directory receiving a job's uploaded files
    pub fn upload_dir(&self, owner: &Owner) -> PathBuf {
        self.chunk_temp_root(owner).join(&owner.job_id)
    }

    /// Directory holding a job's conversion outputs and archive
    pub fn output_dir(&self, owner: &Owner) -> PathBuf {
        self.inner
            .config
            .storage
            .output_dir
            .join(&owner.user_id)
            .join(&owner.job_id)
    }
}
