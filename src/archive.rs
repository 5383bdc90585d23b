//! Archive packager
//!
//! Bundles a job's output directory into one uncompressed `.tar`. Compressed
//! or other container formats are never produced; any such suffix on a
//! requested path is rewritten to `.tar` before anything is written.
//!
//! Builds of the same archive path are serialized through [`ArchiveLocks`].
//! Work files of in-progress builds carry [`WORK_FILE_PREFIX`] and are never
//! bundled, whatever exclusion the caller passes.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// The only archive suffix ever written
pub const ALLOWED_ARCHIVE_SUFFIX: &str = ".tar";

/// Suffixes stripped from requested archive names (longest match first)
pub const FORBIDDEN_ARCHIVE_SUFFIXES: [&str; 4] = [".tar.gz", ".tgz", ".zip", ".gz"];

/// Name prefix of the temporary file an archive is written to before rename
pub const WORK_FILE_PREFIX: &str = ".archive-";

/// Predicate over entry names in the source directory; `true` drops the entry
pub type Exclude = fn(&str) -> bool;

/// Archive error types
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("Archive source directory not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Archive I/O error: {context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_context(context: impl Into<String>) -> impl FnOnce(io::Error) -> ArchiveError {
    let context = context.into();
    move |source| ArchiveError::Io { context, source }
}

// ============================================================================
// Naming
// ============================================================================

/// True iff `name` ends with `.tar` and with none of the forbidden suffixes
pub fn is_allowed(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    if FORBIDDEN_ARCHIVE_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
        return false;
    }
    lower.ends_with(ALLOWED_ARCHIVE_SUFFIX)
}

/// Default exclusion: entries that already are archives
pub fn is_archive_name(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(ALLOWED_ARCHIVE_SUFFIX)
}

/// Normalize a requested archive path to end in exactly one `.tar`.
pub fn file_name_for(path: &Path) -> PathBuf {
    match path.file_name() {
        Some(name) => path.with_file_name(normalize_name(&name.to_string_lossy())),
        None => {
            let mut raw = path.as_os_str().to_owned();
            raw.push(ALLOWED_ARCHIVE_SUFFIX);
            PathBuf::from(raw)
        }
    }
}

fn normalize_name(name: &str) -> String {
    // ASCII lowercasing keeps byte offsets aligned with `name`
    let lower = name.to_ascii_lowercase();
    let stem = FORBIDDEN_ARCHIVE_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix))
        .map(|suffix| &name[..name.len() - suffix.len()])
        .unwrap_or(name);

    if stem.to_ascii_lowercase().ends_with(ALLOWED_ARCHIVE_SUFFIX) {
        stem.to_string()
    } else {
        format!("{stem}{ALLOWED_ARCHIVE_SUFFIX}")
    }
}

/// Deterministic archive name for a job
pub fn job_archive_name(job_id: &str) -> String {
    format!("converted_files_{job_id}{ALLOWED_ARCHIVE_SUFFIX}")
}

/// Where a job's archive lives inside its output directory
pub fn job_archive_path(output_dir: &Path, job_id: &str) -> PathBuf {
    output_dir.join(job_archive_name(job_id))
}

// ============================================================================
// Locking
// ============================================================================

/// One async lock per archive path
#[derive(Clone, Default)]
pub struct ArchiveLocks {
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl ArchiveLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `path`. Held across check-then-build and
    /// rebuild so only one build per archive runs at a time.
    pub async fn lock(&self, path: &Path) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // Entries nobody holds or waits on
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks.entry(path.to_path_buf()).or_default().clone()
        };
        lock.lock_owned().await
    }
}

// ============================================================================
// Building
// ============================================================================

/// Package the immediate entries of `source_dir` into an uncompressed tar.
///
/// `output_path` is normalized first and the normalized path is returned.
/// Entries for which `exclude` returns true are skipped (default: existing
/// `.tar` files), and so are the output file itself and the work files of
/// in-progress builds. The archive is written to a work file beside the
/// target and renamed into place when complete.
pub async fn build_archive(
    source_dir: &Path,
    output_path: &Path,
    exclude: Option<Exclude>,
) -> Result<PathBuf, ArchiveError> {
    let final_path = file_name_for(output_path);
    let source = source_dir.to_path_buf();
    let target = final_path.clone();
    let exclude = exclude.unwrap_or(is_archive_name);

    let entries = tokio::task::spawn_blocking(move || write_archive(&source, &target, exclude))
        .await
        .map_err(|e| ArchiveError::Io {
            context: "archive task".to_string(),
            source: io::Error::new(io::ErrorKind::Other, e),
        })??;

    tracing::info!(
        path = %final_path.display(),
        entries = entries,
        "Created tar archive"
    );

    Ok(final_path)
}

/// Build (or rebuild) the archive for a job, never including prior archives.
pub async fn build_job_archive(output_dir: &Path, job_id: &str) -> Result<PathBuf, ArchiveError> {
    build_archive(
        output_dir,
        &job_archive_path(output_dir, job_id),
        Some(is_archive_name),
    )
    .await
}

fn write_archive(source: &Path, target: &Path, exclude: Exclude) -> Result<usize, ArchiveError> {
    if !source.is_dir() {
        return Err(ArchiveError::SourceMissing(source.to_path_buf()));
    }

    let parent = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent).map_err(io_context(format!("creating {}", parent.display())))?;

    let own_path = target
        .file_name()
        .map(|name| {
            parent
                .canonicalize()
                .map(|dir| dir.join(name))
                .map_err(io_context(format!("resolving {}", parent.display())))
        })
        .transpose()?;
    let source_dir = source
        .canonicalize()
        .map_err(io_context(format!("resolving {}", source.display())))?;

    let mut entries = Vec::new();
    for entry in fs::read_dir(&source_dir).map_err(io_context(format!("listing {}", source.display())))? {
        let entry = entry.map_err(io_context(format!("listing {}", source.display())))?;
        let name = entry.file_name();
        let path = source_dir.join(&name);

        let display_name = name.to_string_lossy();
        if display_name.starts_with(WORK_FILE_PREFIX)
            || exclude(&display_name)
            || own_path.as_deref() == Some(path.as_path())
        {
            continue;
        }
        entries.push((name, path));
    }
    entries.sort();

    let temp = tempfile::Builder::new()
        .prefix(WORK_FILE_PREFIX)
        .suffix(".partial")
        .tempfile_in(&parent)
        .map_err(io_context(format!("creating temporary archive in {}", parent.display())))?;

    let mut builder = tar::Builder::new(temp);
    builder.follow_symlinks(false);

    let mut count = 0;
    for (name, path) in &entries {
        let file_type = fs::symlink_metadata(path)
            .map_err(io_context(format!("stat {}", path.display())))?
            .file_type();

        let appended = if file_type.is_dir() {
            builder.append_dir_all(name, path)
        } else if file_type.is_file() || file_type.is_symlink() {
            builder.append_path_with_name(path, name)
        } else {
            tracing::debug!(path = %path.display(), "Skipping special file during archive");
            continue;
        };
        appended.map_err(io_context(format!("adding {}", path.display())))?;
        count += 1;
    }

    let temp = builder
        .into_inner()
        .map_err(io_context(format!("finishing archive {}", target.display())))?;
    temp.as_file()
        .sync_all()
        .map_err(io_context(format!("syncing archive {}", target.display())))?;
    temp.persist(target)
        .map_err(|e| e.error)
        .map_err(io_context(format!("moving archive to {}", target.display())))?;

    Ok(count)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry_names(archive: &Path) -> Vec<String> {
        let file = fs::File::open(archive).unwrap();
        let mut archive = tar::Archive::new(file);
        archive
            .entries()
            .unwrap()
            .map(|e| {
                let path = e.unwrap().path().unwrap().to_string_lossy().into_owned();
                path.trim_end_matches('/').to_string()
            })
            .collect()
    }

    #[test]
    fn test_file_name_for() {
        assert_eq!(file_name_for(Path::new("output.tar.gz")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("output")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("output.tar")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("output.zip")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("output.tgz")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("output.gz")), PathBuf::from("output.tar"));
        assert_eq!(file_name_for(Path::new("OUT.TAR.GZ")), PathBuf::from("OUT.tar"));
        assert_eq!(
            file_name_for(Path::new("/data/job/bundle.zip")),
            PathBuf::from("/data/job/bundle.tar")
        );
    }

    #[test]
    fn test_is_allowed() {
        assert!(is_allowed("bundle.tar"));
        assert!(is_allowed("BUNDLE.TAR"));
        assert!(!is_allowed("bundle.tar.gz"));
        assert!(!is_allowed("bundle.tgz"));
        assert!(!is_allowed("bundle.zip"));
        assert!(!is_allowed("bundle"));

        for name in ["a.tar.gz", "a", "a.tar", "a.zip"] {
            let normalized = file_name_for(Path::new(name));
            assert!(is_allowed(&normalized.to_string_lossy()));
        }
    }

    #[tokio::test]
    async fn test_build_archive_normalizes_and_filters() {
        let source = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        fs::write(source.path().join("b.png"), b"png").unwrap();
        fs::write(source.path().join("a.pdf"), b"pdf").unwrap();
        fs::write(source.path().join("old.tar"), b"old").unwrap();
        fs::create_dir(source.path().join("images")).unwrap();
        fs::write(source.path().join("images").join("p1.png"), b"p1").unwrap();

        let path = build_archive(source.path(), &out.path().join("bundle.tar.gz"), None)
            .await
            .unwrap();

        assert_eq!(path, out.path().join("bundle.tar"));
        assert!(!out.path().join("bundle.tar.gz").exists());

        let names = entry_names(&path);
        assert_eq!(names, vec!["a.pdf", "b.png", "images", "images/p1.png"]);
    }

    #[tokio::test]
    async fn test_custom_exclude() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("keep.txt"), b"k").unwrap();
        fs::write(source.path().join("skip.log"), b"s").unwrap();

        let path = build_archive(
            source.path(),
            &source.path().join("logs"),
            Some(|name: &str| name.ends_with(".log")),
        )
        .await
        .unwrap();

        assert_eq!(entry_names(&path), vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_job_archive_rebuild_excludes_itself() {
        let output = TempDir::new().unwrap();
        fs::write(output.path().join("one.png"), b"1").unwrap();
        fs::write(output.path().join("two.png"), b"2").unwrap();

        let first = build_job_archive(output.path(), "job-7").await.unwrap();
        assert_eq!(first, output.path().join("converted_files_job-7.tar"));

        let second = build_job_archive(output.path(), "job-7").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(entry_names(&second), vec!["one.png", "two.png"]);

        // No temporary files left behind
        let leftovers = fs::read_dir(output.path()).unwrap().count();
        assert_eq!(leftovers, 3);
    }

    #[tokio::test]
    async fn test_concurrent_job_archive_builds() {
        let output = TempDir::new().unwrap();
        for i in 0..6 {
            fs::write(output.path().join(format!("page-{i}.png")), vec![i as u8; 64 * 1024]).unwrap();
        }

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let dir = output.path().to_path_buf();
                tokio::spawn(async move { build_job_archive(&dir, "job-3").await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let archive = job_archive_path(output.path(), "job-3");
        let expected: Vec<String> = (0..6).map(|i| format!("page-{i}.png")).collect();
        assert_eq!(entry_names(&archive), expected);

        let leftovers: Vec<String> = fs::read_dir(output.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .filter(|name| name.starts_with(WORK_FILE_PREFIX))
            .collect();
        assert!(leftovers.is_empty(), "work files left: {leftovers:?}");
    }

    #[tokio::test]
    async fn test_work_files_never_bundled() {
        let source = TempDir::new().unwrap();
        fs::write(source.path().join("keep.txt"), b"k").unwrap();
        fs::write(source.path().join(".archive-x1Yz.partial"), b"half").unwrap();

        // Even with an exclusion that keeps everything
        let path = build_archive(source.path(), &source.path().join("all"), Some(|_: &str| false))
            .await
            .unwrap();

        assert_eq!(entry_names(&path), vec!["keep.txt"]);
    }

    #[tokio::test]
    async fn test_archive_locks_serialize_per_path() {
        let locks = ArchiveLocks::new();
        let a = Path::new("/out/a.tar");

        let held = locks.lock(a).await;

        // A different path is independent
        let other = locks.lock(Path::new("/out/b.tar")).await;
        drop(other);

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move { locks.lock(Path::new("/out/a.tar")).await; })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        drop(held);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_source_writes_nothing() {
        let out = TempDir::new().unwrap();
        let target = out.path().join("bundle.tar");

        let result = build_archive(&out.path().join("missing"), &target, None).await;

        assert!(matches!(result, Err(ArchiveError::SourceMissing(_))));
        assert!(!target.exists());
        assert_eq!(fs::read_dir(out.path()).unwrap().count(), 0);
    }
}
