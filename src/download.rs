//! Download chunk reader
//!
//! Serves any on-disk file either whole or as fixed-size byte-range chunks,
//! using the same chunk size as the upload side.

use std::io::{self, SeekFrom};
use std::path::Path;

use axum::body::Bytes;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue, InvalidHeaderValue};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;

use crate::transfer::{chunk_count, transfer_mode, TransferMode, CHUNK_SIZE_BYTES, CHUNK_THRESHOLD_BYTES};

pub const X_CHUNK_INDEX: HeaderName = HeaderName::from_static("x-chunk-index");
pub const X_TOTAL_CHUNKS: HeaderName = HeaderName::from_static("x-total-chunks");
pub const X_TOTAL_SIZE: HeaderName = HeaderName::from_static("x-total-size");
pub const X_FILE_NAME: HeaderName = HeaderName::from_static("x-file-name");

/// Chunking metadata for a file, derived from `stat()`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDownloadInfo {
    pub total_size: u64,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub file_name: String,
}

/// Whether a file of `size` bytes should be downloaded in chunks
pub fn should_use_chunked(size: u64) -> bool {
    transfer_mode(size, CHUNK_THRESHOLD_BYTES) == TransferMode::Chunked
}

/// Stat a file and describe how it splits into chunks.
///
/// Returns `None` if the file does not exist or is not a regular file.
pub async fn chunk_info(path: &Path) -> io::Result<Option<ChunkDownloadInfo>> {
    let metadata = match tokio::fs::metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    if !metadata.is_file() {
        return Ok(None);
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    Ok(Some(ChunkDownloadInfo {
        total_size: metadata.len(),
        total_chunks: chunk_count(metadata.len(), CHUNK_SIZE_BYTES),
        chunk_size: CHUNK_SIZE_BYTES,
        file_name,
    }))
}

/// Read chunk `index` of a file: bytes `[index * chunk_size, min((index + 1) * chunk_size, size))`.
///
/// Returns `None` if the file is missing or the chunk starts at or past the
/// end of the file. Index 0 of an empty file is one empty chunk.
pub async fn read_chunk(path: &Path, index: u64, chunk_size: u64) -> io::Result<Option<Bytes>> {
    let mut file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let size = file.metadata().await?.len();
    let Some(start) = index.checked_mul(chunk_size) else {
        return Ok(None);
    };

    if start >= size {
        return Ok((index == 0 && size == 0).then(Bytes::new));
    }

    let end = start.saturating_add(chunk_size).min(size);
    let mut buf = vec![0u8; (end - start) as usize];

    file.seek(SeekFrom::Start(start)).await?;
    file.read_exact(&mut buf).await?;

    Ok(Some(Bytes::from(buf)))
}

/// Open a file for a whole-file download, read lazily in `piece_size` pieces.
///
/// Returns the size of the opened file together with the stream, or `None`
/// if the file is missing or not a regular file. The stream keeps reading
/// the opened file even if its path is replaced meanwhile.
pub async fn file_stream(
    path: &Path,
    piece_size: u64,
) -> io::Result<Option<(u64, impl Stream<Item = io::Result<Bytes>> + Send + 'static)>> {
    let file = match tokio::fs::File::open(path).await {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e),
    };

    let metadata = file.metadata().await?;
    if !metadata.is_file() {
        return Ok(None);
    }
    let size = metadata.len();

    // Capped at the opened size so the body matches Content-Length
    let stream = ReaderStream::with_capacity(file.take(size), piece_size as usize);

    Ok(Some((size, stream)))
}

/// `Content-Range` value for `len` bytes of chunk `index`
pub fn content_range(info: &ChunkDownloadInfo, index: u64, len: u64) -> String {
    if len == 0 {
        return format!("bytes */{}", info.total_size);
    }
    let start = index * info.chunk_size;
    format!("bytes {}-{}/{}", start, start + len - 1, info.total_size)
}

/// Response headers for one downloaded chunk
pub fn chunk_headers(
    info: &ChunkDownloadInfo,
    index: u64,
    len: u64,
) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(len));
    headers.insert(
        header::CONTENT_RANGE,
        HeaderValue::from_str(&content_range(info, index, len))?,
    );
    headers.insert(header::ACCEPT_RANGES, HeaderValue::from_static("bytes"));
    headers.insert(X_CHUNK_INDEX, HeaderValue::from(index));
    headers.insert(X_TOTAL_CHUNKS, HeaderValue::from(info.total_chunks));
    headers.insert(X_TOTAL_SIZE, HeaderValue::from(info.total_size));
    headers.insert(
        X_FILE_NAME,
        HeaderValue::from_str(&urlencoding::encode(&info.file_name))?,
    );
    Ok(headers)
}

/// Response headers for a whole-file download
pub fn direct_headers(file_name: &str, size: u64) -> Result<HeaderMap, InvalidHeaderValue> {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size));
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            urlencoding::encode(file_name)
        ))?,
    );
    Ok(headers)
}

// ============================================================================
// Tests
// ============================================================================
