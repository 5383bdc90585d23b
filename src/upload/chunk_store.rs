//! Chunk Store
//!
//! On-disk chunk files for in-flight uploads and their reassembly into the
//! final file. Chunk order comes from the parsed numeric index, never from
//! directory listing order.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use super::types::{AssembledFile, SizeMismatch, UploadError, UploadSession};

/// Prefix of every chunk file name
const CHUNK_PREFIX: &str = "chunk_";

/// Zero-pad width of the index in chunk file names
const CHUNK_INDEX_WIDTH: usize = 6;

// ============================================================================
// Chunk Files
// ============================================================================

/// File name for a chunk index
pub fn chunk_file_name(chunk_index: u32) -> String {
    format!("{CHUNK_PREFIX}{chunk_index:0width$}", width = CHUNK_INDEX_WIDTH)
}

/// Parse a chunk index back out of a file name.
///
/// Anything that is not `chunk_` followed only by digits (temporary files in
/// particular) is not a chunk.
pub fn parse_chunk_index(file_name: &str) -> Option<u32> {
    let digits = file_name.strip_prefix(CHUNK_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Persist one chunk into a session directory.
///
/// The bytes are written under a unique temporary name, synced, and renamed
/// over the final chunk name, so a retried index replaces the old file
/// atomically.
pub async fn write_chunk(
    temp_dir: &Path,
    chunk_index: u32,
    data: &[u8],
) -> Result<PathBuf, UploadError> {
    let chunk_path = temp_dir.join(chunk_file_name(chunk_index));
    let partial_path = temp_dir.join(format!(
        "{}.{}.tmp",
        chunk_file_name(chunk_index),
        Uuid::new_v4()
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&partial_path).await?;
        file.write_all(data).await?;
        file.sync_all().await?;
        tokio::fs::rename(&partial_path, &chunk_path).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return Err(UploadError::storage(
            format!("writing chunk {} to {}", chunk_index, temp_dir.display()),
            e,
        ));
    }

    Ok(chunk_path)
}

/// List the chunk files in a session directory, sorted by numeric index
pub async fn list_chunks(temp_dir: &Path) -> Result<Vec<(u32, PathBuf)>, UploadError> {
    let mut entries = tokio::fs::read_dir(temp_dir)
        .await
        .map_err(|e| UploadError::storage(format!("listing {}", temp_dir.display()), e))?;

    let mut chunks = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| UploadError::storage(format!("listing {}", temp_dir.display()), e))?
    {
        let name = entry.file_name();
        if let Some(index) = name.to_str().and_then(parse_chunk_index) {
            chunks.push((index, entry.path()));
        }
    }

    chunks.sort_by_key(|(index, _)| *index);
    Ok(chunks)
}

// ============================================================================
// Reassembly
// ============================================================================

/// Merge a complete session's chunks, in index order, into
/// `target_dir/file_name`.
///
/// The output is written beside the target and renamed into place once fully
/// synced. A size differing from the declared one is reported, not fatal.
pub async fn assemble(
    session: &UploadSession,
    target_dir: &Path,
) -> Result<AssembledFile, UploadError> {
    let chunks = list_chunks(&session.temp_dir).await?;

    let present: Vec<u32> = chunks.iter().map(|(index, _)| *index).collect();
    if !present.iter().copied().eq(0..session.total_chunks) {
        let missing = (0..session.total_chunks)
            .filter(|i| present.binary_search(i).is_err())
            .collect();
        return Err(UploadError::MissingChunks(missing));
    }

    tokio::fs::create_dir_all(target_dir)
        .await
        .map_err(|e| UploadError::storage(format!("creating {}", target_dir.display()), e))?;

    let target_path = target_dir.join(&session.file_name);
    let partial_path = target_dir.join(format!(".{}.{}.part", session.file_name, Uuid::new_v4()));

    let written = write_assembled(&chunks, &partial_path).await;
    let sha256 = match written {
        Ok(sha256) => sha256,
        Err(e) => {
            let _ = tokio::fs::remove_file(&partial_path).await;
            return Err(e);
        }
    };

    if let Err(e) = tokio::fs::rename(&partial_path, &target_path).await {
        let _ = tokio::fs::remove_file(&partial_path).await;
        return Err(UploadError::storage(
            format!("moving assembled file to {}", target_path.display()),
            e,
        ));
    }

    let size = tokio::fs::metadata(&target_path)
        .await
        .map_err(|e| UploadError::storage(format!("stat {}", target_path.display()), e))?
        .len();

    let size_mismatch = (size != session.total_size).then(|| {
        tracing::warn!(
            upload_id = %session.upload_id,
            expected = session.total_size,
            actual = size,
            "File size mismatch after reassembly"
        );
        SizeMismatch {
            declared: session.total_size,
            actual: size,
        }
    });

    tracing::info!(
        upload_id = %session.upload_id,
        chunks = chunks.len(),
        path = %target_path.display(),
        size = size,
        "Merged chunks into final file"
    );

    Ok(AssembledFile {
        path: target_path,
        size,
        sha256,
        size_mismatch,
    })
}

async fn write_assembled(
    chunks: &[(u32, PathBuf)],
    partial_path: &Path,
) -> Result<String, UploadError> {
    let io_err = |e: std::io::Error| UploadError::storage(format!("writing {}", partial_path.display()), e);

    let mut output = tokio::fs::File::create(partial_path).await.map_err(io_err)?;
    let mut hasher = Sha256::new();

    for (index, chunk_path) in chunks {
        let data = tokio::fs::read(chunk_path)
            .await
            .map_err(|e| UploadError::storage(format!("reading chunk {}", index), e))?;
        hasher.update(&data);
        output.write_all(&data).await.map_err(io_err)?;
    }

    output.flush().await.map_err(io_err)?;
    output.sync_all().await.map_err(io_err)?;

    Ok(hex::encode(hasher.finalize()))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upload::types::{Owner, SessionStatus};
    use chrono::Utc;
    use tempfile::TempDir;

    fn session(temp_dir: &Path, total_chunks: u32, total_size: u64) -> UploadSession {
        UploadSession {
            upload_id: "up".to_string(),
            owner: Owner::new("user", "job"),
            file_name: "merged.bin".to_string(),
            total_size,
            total_chunks,
            received_chunks: (0..total_chunks).collect(),
            created_at: Utc::now(),
            temp_dir: temp_dir.to_path_buf(),
            status: SessionStatus::Assembling,
        }
    }

    #[test]
    fn test_chunk_file_names() {
        assert_eq!(chunk_file_name(0), "chunk_000000");
        assert_eq!(chunk_file_name(42), "chunk_000042");
        assert_eq!(chunk_file_name(1_234_567), "chunk_1234567");

        assert_eq!(parse_chunk_index("chunk_000042"), Some(42));
        assert_eq!(parse_chunk_index("chunk_1234567"), Some(1_234_567));
        assert_eq!(parse_chunk_index("chunk_000042.3f2a.tmp"), None);
        assert_eq!(parse_chunk_index("chunk_"), None);
        assert_eq!(parse_chunk_index("other"), None);
    }

    #[tokio::test]
    async fn test_list_chunks_sorts_numerically() {
        let temp = TempDir::new().unwrap();
        // Unpadded names sort wrongly as strings
        for name in ["chunk_10", "chunk_2", "chunk_1", "chunk_2.abc.tmp", "notes.txt"] {
            std::fs::write(temp.path().join(name), name).unwrap();
        }

        let listed: Vec<u32> = list_chunks(temp.path())
            .await
            .unwrap()
            .into_iter()
            .map(|(index, _)| index)
            .collect();
        assert_eq!(listed, vec![1, 2, 10]);
    }

    #[tokio::test]
    async fn test_write_chunk_overwrites() {
        let temp = TempDir::new().unwrap();

        write_chunk(temp.path(), 3, b"first").await.unwrap();
        let path = write_chunk(temp.path(), 3, b"second").await.unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"second");
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_assemble_in_index_order() {
        let chunks_dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();

        for (index, data) in [(2u32, &b"CCCCC"[..]), (0, b"AAAAA"), (3, b"DDDD"), (1, b"BBBBB")] {
            write_chunk(chunks_dir.path(), index, data).await.unwrap();
        }

        let file = assemble(&session(chunks_dir.path(), 4, 19), target.path())
            .await
            .unwrap();

        assert_eq!(file.path, target.path().join("merged.bin"));
        assert_eq!(std::fs::read(&file.path).unwrap(), b"AAAAABBBBBCCCCCDDDD");
        assert_eq!(file.size, 19);
        assert!(file.size_mismatch.is_none());
        assert_eq!(file.sha256.len(), 64);
        // Only the final file is left in the target directory
        assert_eq!(std::fs::read_dir(target.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_assemble_reports_size_mismatch() {
        let chunks_dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_chunk(chunks_dir.path(), 0, b"12345").await.unwrap();

        let file = assemble(&session(chunks_dir.path(), 1, 99), target.path())
            .await
            .unwrap();

        assert_eq!(
            file.size_mismatch,
            Some(SizeMismatch {
                declared: 99,
                actual: 5
            })
        );
        assert_eq!(std::fs::read(&file.path).unwrap(), b"12345");
    }

    #[tokio::test]
    async fn test_assemble_missing_chunk() {
        let chunks_dir = TempDir::new().unwrap();
        let target = TempDir::new().unwrap();
        write_chunk(chunks_dir.path(), 0, b"a").await.unwrap();
        write_chunk(chunks_dir.path(), 2, b"c").await.unwrap();

        let result = assemble(&session(chunks_dir.path(), 3, 3), target.path()).await;

        assert!(matches!(result, Err(UploadError::MissingChunks(ref m)) if m == &vec![1]));
        assert!(!target.path().join("merged.bin").exists());
    }
}
