//! Upload → download → archive through the library API

use std::collections::HashSet;

use conversion_transfer::archive::{build_job_archive, is_allowed};
use conversion_transfer::download::{chunk_info, content_range, read_chunk};
use conversion_transfer::transfer::{TransferMode, TransferPlan, CHUNK_SIZE_BYTES};
use conversion_transfer::upload::{
    handle_chunk_upload, ChunkUploadOutcome, ChunkUploadRequest, Owner, SessionManager,
};
use tempfile::TempDir;

fn request(owner: &Owner, index: u32, total: u32, size: u64) -> ChunkUploadRequest {
    ChunkUploadRequest {
        upload_id: "e2e-upload".to_string(),
        chunk_index: index,
        total_chunks: total,
        file_name: "movie.mkv".to_string(),
        total_size: size,
        owner: owner.clone(),
    }
}

#[tokio::test]
async fn test_large_file_round_trip() {
    let root = TempDir::new().unwrap();
    let owner = Owner::new("user-1", "job-1");
    let temp_root = root.path().join("uploads").join(&owner.user_id);
    let target_dir = temp_root.join(&owner.job_id);

    let size: u64 = 12 * 1024 * 1024;
    let data: Vec<u8> = (0..size).map(|i| (i % 253) as u8).collect();

    let plan = TransferPlan::for_size(size);
    assert_eq!(plan.mode, TransferMode::Chunked);
    assert_eq!(plan.total_chunks, 3);

    let chunk_size = plan.chunk_size as usize;
    let chunks: Vec<&[u8]> = data.chunks(chunk_size).collect();
    assert_eq!(chunks.len(), 3);

    let sessions = SessionManager::new();
    let mut completed = None;
    for index in [2u32, 0, 1] {
        let outcome = handle_chunk_upload(
            &sessions,
            &request(&owner, index, 3, size),
            chunks[index as usize],
            &temp_root,
            &target_dir,
        )
        .await
        .unwrap();

        if let ChunkUploadOutcome::Completed(file) = outcome {
            completed = Some(file);
        }
    }

    let file = completed.expect("last chunk completes the upload");
    assert_eq!(file.path, target_dir.join("movie.mkv"));
    assert_eq!(file.size, size);
    assert!(file.size_mismatch.is_none());
    assert_eq!(std::fs::read(&file.path).unwrap(), data);
    assert_eq!(sessions.session_count().await, 0);

    // Download it back chunk by chunk
    let info = chunk_info(&file.path).await.unwrap().unwrap();
    assert_eq!(info.total_chunks, 3);
    assert_eq!(info.chunk_size, CHUNK_SIZE_BYTES);

    let mut joined = Vec::with_capacity(size as usize);
    let mut next_start = 0u64;
    for index in 0..info.total_chunks {
        let chunk = read_chunk(&file.path, index, info.chunk_size)
            .await
            .unwrap()
            .unwrap();
        let end = next_start + chunk.len() as u64 - 1;
        assert_eq!(
            content_range(&info, index, chunk.len() as u64),
            format!("bytes {}-{}/{}", next_start, end, size)
        );
        next_start = end + 1;
        joined.extend_from_slice(&chunk);
    }
    assert_eq!(next_start, size);
    assert_eq!(joined, data);
}

#[tokio::test]
async fn test_job_outputs_archive_download() {
    let root = TempDir::new().unwrap();
    let output_dir = root.path().join("output").join("user-1").join("job-9");
    std::fs::create_dir_all(output_dir.join("thumbs")).unwrap();
    std::fs::write(output_dir.join("doc.pdf"), vec![1u8; 4096]).unwrap();
    std::fs::write(output_dir.join("thumbs").join("t1.jpg"), b"jpg").unwrap();
    std::fs::write(output_dir.join("stale.tar"), b"old").unwrap();

    let archive = build_job_archive(&output_dir, "job-9").await.unwrap();
    assert!(is_allowed(&archive.to_string_lossy()));

    let info = chunk_info(&archive).await.unwrap().unwrap();
    let mut bytes = Vec::new();
    for index in 0..info.total_chunks {
        let chunk = read_chunk(&archive, index, info.chunk_size)
            .await
            .unwrap()
            .unwrap();
        bytes.extend_from_slice(&chunk);
    }
    assert_eq!(bytes.len() as u64, info.total_size);

    let mut tar = tar::Archive::new(bytes.as_slice());
    let names: HashSet<String> = tar
        .entries()
        .unwrap()
        .map(|e| {
            let name = e.unwrap().path().unwrap().to_string_lossy().into_owned();
            name.trim_end_matches('/').to_string()
        })
        .collect();

    let expected: HashSet<String> = ["doc.pdf", "thumbs", "thumbs/t1.jpg"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(names, expected);
}
