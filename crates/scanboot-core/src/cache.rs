//! Content-addressed download cache shared between scanner invocations.
//!
//! Entries live at `<base>/<hash>/<filename>`. Downloads land in `<base>/_tmp`
//! first and are only moved into place once their digest matches, so a reader
//! never observes a partially written entry. Several OS processes may populate
//! the same cache concurrently; the first rename wins and the others discard
//! their copy.
//!
//! Entry names come from server metadata, so a file name must be a single
//! plain path component and a hash must be hex before either touches the
//! disk.

use std::fs::File;
use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::DownloadError;
use crate::hasher::{digest_file, HashAlgorithm, HashError};

pub const TEMP_DIR_NAME: &str = "_tmp";

/// Byte source used to fill a cache entry.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Write the bytes of `filename` to `destination`, replacing its content.
    async fn download(&self, filename: &str, destination: &Path) -> Result<(), DownloadError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedFile {
    pub path: PathBuf,
    /// The entry existed before this call.
    pub cache_hit: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("refusing cache entry '{filename}' under '{hash}': {reason}")]
    InvalidEntry {
        filename: String,
        hash: String,
        reason: &'static str,
    },
    #[error(
        "checksum mismatch: expected {expected}, got {actual} (download kept at {})",
        .temp_path.display()
    )]
    HashMismatch {
        expected: String,
        actual: String,
        temp_path: PathBuf,
    },
    #[error("failed to download {}", .path.display())]
    Download {
        path: PathBuf,
        #[source]
        source: DownloadError,
    },
    #[error("failed to hash {}", .path.display())]
    Hash {
        path: PathBuf,
        #[source]
        source: HashError,
    },
    #[error("cache I/O failure at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> CacheError + '_ {
    move |source| CacheError::Io {
        path: path.to_path_buf(),
        source,
    }
}

fn validate_entry(filename: &str, hash: &str) -> Result<(), CacheError> {
    let invalid = |reason| {
        Err(CacheError::InvalidEntry {
            filename: filename.to_string(),
            hash: hash.to_string(),
            reason,
        })
    };
    if hash.is_empty() || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return invalid("hash must be hexadecimal");
    }
    if filename.is_empty() || filename == "." || filename == ".." {
        return invalid("file name is empty or a directory reference");
    }
    if filename.contains(['/', '\\', ':', '\0']) {
        return invalid("file name must not contain separators or a drive prefix");
    }
    let mut components = Path::new(filename).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => invalid("file name must be a single path component"),
    }
}

/// Place the verified download at `target` by copying it through a sibling
/// temp file, for when a rename cannot cross from `_tmp`. An entry created
/// meanwhile by another process is kept.
fn copy_into_place(source: &Path, target: &Path) -> Result<(), CacheError> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix(".copy-")
        .suffix(".part")
        .tempfile_in(dir)
        .map_err(io_err(dir))?;
    let staged_path = staged.path().to_path_buf();
    let mut input = File::open(source).map_err(io_err(source))?;
    io::copy(&mut input, staged.as_file_mut()).map_err(io_err(&staged_path))?;
    match staged.persist_noclobber(target) {
        Ok(_) => Ok(()),
        Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
            debug!(
                target: "scanboot::cache",
                path = %target.display(),
                "entry appeared concurrently; discarding copied file"
            );
            Ok(())
        }
        Err(err) => Err(CacheError::Io {
            path: target.to_path_buf(),
            source: err.error,
        }),
    }
}

#[derive(Debug, Clone)]
pub struct DownloadCache {
    base_dir: PathBuf,
    temp_dir: PathBuf,
}

impl DownloadCache {
    /// Directories are created lazily on first download.
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        let temp_dir = base_dir.join(TEMP_DIR_NAME);
        Self { base_dir, temp_dir }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// `<base>/<hash>/<filename>`, or `InvalidEntry` when either part could
    /// leave that directory.
    pub fn entry_path(&self, filename: &str, hash: &str) -> Result<PathBuf, CacheError> {
        validate_entry(filename, hash)?;
        Ok(self.base_dir.join(hash).join(filename))
    }

    /// Path of an existing entry, if any. Names that cannot form an entry
    /// are never present.
    pub fn lookup(&self, filename: &str, hash: &str) -> Option<PathBuf> {
        let path = self.entry_path(filename, hash).ok()?;
        path.exists().then_some(path)
    }

    /// Return the entry for `(filename, expected_hash)`, downloading and
    /// verifying it first when it is not cached yet. Existing entries are
    /// trusted as-is.
    pub async fn get_or_download(
        &self,
        filename: &str,
        expected_hash: &str,
        algorithm: HashAlgorithm,
        downloader: &dyn Downloader,
    ) -> Result<CachedFile, CacheError> {
        let target = self.entry_path(filename, expected_hash)?;
        if target.exists() {
            debug!(
                target: "scanboot::cache",
                path = %target.display(),
                "cache hit"
            );
            return Ok(CachedFile {
                path: target,
                cache_hit: true,
            });
        }

        tokio::fs::create_dir_all(&self.temp_dir)
            .await
            .map_err(io_err(&self.temp_dir))?;
        let temp = tempfile::Builder::new()
            .prefix(&format!("{filename}."))
            .suffix(".part")
            .tempfile_in(&self.temp_dir)
            .map_err(io_err(&self.temp_dir))?;
        let temp_path = temp.path().to_path_buf();

        info!(
            target: "scanboot::cache",
            filename,
            hash = %expected_hash,
            "downloading artifact"
        );
        // An error here drops `temp`, which removes the partial file.
        downloader
            .download(filename, &temp_path)
            .await
            .map_err(|source| CacheError::Download {
                path: temp_path.clone(),
                source,
            })?;

        let hash_path = temp_path.clone();
        let actual = tokio::task::spawn_blocking(move || digest_file(&hash_path, algorithm))
            .await?
            .map_err(|source| CacheError::Hash {
                path: temp_path.clone(),
                source,
            })?;

        if !actual.eq_ignore_ascii_case(expected_hash.trim()) {
            let (_file, kept) = temp.keep().map_err(|err| CacheError::Io {
                path: temp_path.clone(),
                source: err.error,
            })?;
            warn!(
                target: "scanboot::cache",
                expected = %expected_hash,
                actual = %actual,
                path = %kept.display(),
                "downloaded artifact failed verification"
            );
            return Err(CacheError::HashMismatch {
                expected: expected_hash.to_string(),
                actual,
                temp_path: kept,
            });
        }

        if let Some(hash_dir) = target.parent() {
            tokio::fs::create_dir_all(hash_dir)
                .await
                .map_err(io_err(hash_dir))?;
        }

        match temp.persist_noclobber(&target) {
            Ok(_) => {}
            Err(err) if err.error.kind() == io::ErrorKind::AlreadyExists => {
                debug!(
                    target: "scanboot::cache",
                    path = %target.display(),
                    "entry appeared concurrently; discarding local copy"
                );
                drop(err.file);
            }
            Err(err)
                if matches!(
                    err.error.kind(),
                    io::ErrorKind::CrossesDevices | io::ErrorKind::Unsupported
                ) =>
            {
                warn!(
                    target: "scanboot::cache",
                    path = %target.display(),
                    error = %err.error,
                    "atomic move unavailable; placing entry by copy"
                );
                let downloaded = err.file;
                let copy_target = target.clone();
                tokio::task::spawn_blocking(move || {
                    copy_into_place(downloaded.path(), &copy_target)
                })
                .await??;
            }
            Err(err) => {
                return Err(CacheError::Io {
                    path: target,
                    source: err.error,
                });
            }
        }

        Ok(CachedFile {
            path: target,
            cache_hit: false,
        })
    }
}
