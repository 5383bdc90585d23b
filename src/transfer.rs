//! Transfer policy
//!
//! Decides whether a payload moves in one request or in chunks, and how many
//! chunks that takes. Upload and download share these numbers so both
//! directions always agree on chunk boundaries.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ============================================================================
// Constants
// ============================================================================

/// Payloads at or below this size move in a single request: 10MB
pub const CHUNK_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

/// Size of every chunk except possibly the last: 5MB
pub const CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Inactivity timeout after which an upload session is destroyed
pub const UPLOAD_SESSION_TIMEOUT: Duration = Duration::from_secs(60 * 60);

/// How often the session sweeper runs
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Directory (under a user's upload root) holding in-flight chunk sessions
pub const CHUNK_TEMP_DIR: &str = "chunks_temp";

// ============================================================================
// Policy
// ============================================================================

/// How a payload is transferred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Whole payload in one request
    Direct,
    /// Payload split into independently sent chunks
    Chunked,
}

/// Pick the transfer mode for a payload of `size` bytes.
pub fn transfer_mode(size: u64, threshold: u64) -> TransferMode {
    if size <= threshold {
        TransferMode::Direct
    } else {
        TransferMode::Chunked
    }
}

/// Number of chunks needed for `size` bytes.
///
/// A zero-byte payload is one empty chunk, never zero chunks.
pub fn chunk_count(size: u64, chunk_size: u64) -> u64 {
    debug_assert!(chunk_size > 0, "chunk size must be non-zero");
    size.div_ceil(chunk_size).max(1)
}

/// Transfer plan answered to clients before they start an upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferPlan {
    pub mode: TransferMode,
    pub chunk_size: u64,
    pub total_chunks: u64,
}

impl TransferPlan {
    pub fn for_size(size: u64) -> Self {
        let mode = transfer_mode(size, CHUNK_THRESHOLD_BYTES);
        let total_chunks = match mode {
            TransferMode::Direct => 1,
            TransferMode::Chunked => chunk_count(size, CHUNK_SIZE_BYTES),
        };

        Self {
            mode,
            chunk_size: CHUNK_SIZE_BYTES,
            total_chunks,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    const MIB: u64 = 1024 * 1024;

    #[test]
    fn test_transfer_mode_threshold() {
        for size in [0, 1, MIB, CHUNK_THRESHOLD_BYTES - 1, CHUNK_THRESHOLD_BYTES] {
            assert_eq!(transfer_mode(size, CHUNK_THRESHOLD_BYTES), TransferMode::Direct);
        }
        for size in [CHUNK_THRESHOLD_BYTES + 1, 12 * MIB, u64::MAX] {
            assert_eq!(transfer_mode(size, CHUNK_THRESHOLD_BYTES), TransferMode::Chunked);
        }
    }

    #[test]
    fn test_chunk_count() {
        assert_eq!(chunk_count(0, 5), 1);
        assert_eq!(chunk_count(1, 5), 1);
        assert_eq!(chunk_count(5, 5), 1);
        assert_eq!(chunk_count(6, 5), 2);
        assert_eq!(chunk_count(19, 5), 4);
        assert_eq!(chunk_count(12 * MIB, CHUNK_SIZE_BYTES), 3);
        assert_eq!(chunk_count(1000, 256), 4);

        for size in 1..200u64 {
            for chunk in 1..20u64 {
                let expected = (size + chunk - 1) / chunk;
                assert_eq!(chunk_count(size, chunk), expected);
            }
        }
    }

    #[test]
    fn test_transfer_plan() {
        let small = TransferPlan::for_size(MIB);
        assert_eq!(small.mode, TransferMode::Direct);
        assert_eq!(small.total_chunks, 1);

        let large = TransferPlan::for_size(12 * MIB);
        assert_eq!(large.mode, TransferMode::Chunked);
        assert_eq!(large.total_chunks, 3);
        assert_eq!(large.chunk_size, CHUNK_SIZE_BYTES);
    }
}
