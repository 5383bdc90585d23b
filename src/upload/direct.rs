//! Direct (single request) uploads for payloads under the chunk threshold

use std::path::{Path, PathBuf};

use super::types::UploadError;

/// Write a whole payload to `target_dir/file_name`, creating parent
/// directories as needed.
pub async fn handle_direct_upload(
    target_dir: &Path,
    file_name: &str,
    data: &[u8],
) -> Result<PathBuf, UploadError> {
    tokio::fs::create_dir_all(target_dir)
        .await
        .map_err(|e| UploadError::storage(format!("creating {}", target_dir.display()), e))?;

    let target_path = target_dir.join(file_name);
    tokio::fs::write(&target_path, data)
        .await
        .map_err(|e| UploadError::storage(format!("writing {}", target_path.display()), e))?;

    tracing::info!(
        path = %target_path.display(),
        size = data.len(),
        "File uploaded directly"
    );

    Ok(target_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_direct_upload_creates_dirs() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("user").join("job");

        let path = handle_direct_upload(&target, "small.txt", b"hello").await.unwrap();

        assert_eq!(path, target.join("small.txt"));
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn test_direct_upload_io_failure() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("blocker");
        std::fs::write(&blocker, b"file").unwrap();

        let result = handle_direct_upload(&blocker, "x.txt", b"data").await;

        match result {
            Err(err @ UploadError::Storage { .. }) => {
                assert!(std::error::Error::source(&err).is_some());
            }
            other => panic!("expected storage error, got {other:?}"),
        }
    }
}
