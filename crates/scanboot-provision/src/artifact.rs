use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use scanboot_core::archive::{extract, normalize_entry, ArchiveFormat};
use scanboot_core::DownloadCache;
use tracing::{debug, info};

use crate::error::ProvisionError;
use crate::metadata::{ArtifactDownloader, ArtifactMetadata, MetadataClient};

const EXTRACTED_SUFFIX: &str = "_extracted";

/// A cached artifact before its executable has been located.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProvisionedArtifact {
    /// The cached file is the executable.
    Plain(PathBuf),
    /// The executable lives at `relative_executable` inside the archive.
    Archived {
        archive: PathBuf,
        relative_executable: String,
    },
}

impl ProvisionedArtifact {
    pub fn classify(cached: PathBuf, metadata: &ArtifactMetadata) -> Self {
        match (
            metadata.relative_executable_path.as_deref(),
            ArchiveFormat::detect(&metadata.filename),
        ) {
            (Some(relative), Some(_)) => ProvisionedArtifact::Archived {
                archive: cached,
                relative_executable: relative.to_string(),
            },
            _ => ProvisionedArtifact::Plain(cached),
        }
    }

    /// Extract if needed and return the concrete executable path.
    pub async fn resolve_executable(self, cache: &DownloadCache) -> Result<PathBuf, ProvisionError> {
        match self {
            ProvisionedArtifact::Plain(path) => Ok(path),
            ProvisionedArtifact::Archived {
                archive,
                relative_executable,
            } => {
                // A leading separator means the archive root, not the filesystem root.
                let stripped = relative_executable.trim_start_matches(['/', '\\']);
                let relative = normalize_entry(stripped).ok_or_else(|| {
                    ProvisionError::InvalidExecutablePath {
                        path: relative_executable.clone(),
                    }
                })?;
                let temp_dir = cache.temp_dir().to_path_buf();
                let root =
                    tokio::task::spawn_blocking(move || ensure_extracted(&archive, &temp_dir))
                        .await??;
                let executable = root.join(relative);
                if !executable.is_file() {
                    return Err(ProvisionError::MissingExecutable { path: executable });
                }
                Ok(executable)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    pub executable: PathBuf,
    pub cache_hit: bool,
}

/// Fetch `metadata` through the cache and resolve its executable.
pub async fn provision_artifact(
    cache: &DownloadCache,
    client: &dyn MetadataClient,
    metadata: &ArtifactMetadata,
) -> Result<ResolvedArtifact, ProvisionError> {
    let downloader = ArtifactDownloader::new(client, metadata.source());
    let cached = cache
        .get_or_download(
            &metadata.filename,
            &metadata.expected_hash,
            metadata.hash_algorithm,
            &downloader,
        )
        .await?;
    let executable = ProvisionedArtifact::classify(cached.path, metadata)
        .resolve_executable(cache)
        .await?;
    Ok(ResolvedArtifact {
        executable,
        cache_hit: cached.cache_hit,
    })
}

/// Extract `archive` next to itself as `<name>_extracted`, reusing an
/// existing tree. Extraction happens in a scratch directory under
/// `temp_dir` and is renamed into place, so a half-extracted tree is never
/// visible at the final location.
fn ensure_extracted(archive: &Path, temp_dir: &Path) -> Result<PathBuf, ProvisionError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let target = archive.with_file_name(format!("{name}{EXTRACTED_SUFFIX}"));
    if target.is_dir() {
        debug!(
            target: "scanboot::provision",
            path = %target.display(),
            "reusing extracted archive"
        );
        return Ok(target);
    }

    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: io::Error| ProvisionError::Io { path, source }
    };
    fs::create_dir_all(temp_dir).map_err(io_err(temp_dir))?;
    let scratch = tempfile::Builder::new()
        .prefix("extract-")
        .tempdir_in(temp_dir)
        .map_err(io_err(temp_dir))?;

    info!(
        target: "scanboot::provision",
        archive = %archive.display(),
        "extracting archive"
    );
    extract(archive, scratch.path()).map_err(|source| ProvisionError::Extract {
        archive: archive.to_path_buf(),
        source,
    })?;

    match fs::rename(scratch.path(), &target) {
        Ok(()) => Ok(target),
        // Another process finished first; `scratch` is removed on drop.
        Err(_) if target.is_dir() => {
            debug!(
                target: "scanboot::provision",
                path = %target.display(),
                "archive extracted concurrently; discarding local copy"
            );
            Ok(target)
        }
        Err(source) => Err(ProvisionError::Io {
            path: target,
            source,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanboot_core::HashAlgorithm;
    use tempfile::tempdir;

    fn jre_metadata(filename: &str, java: Option<&str>) -> ArtifactMetadata {
        ArtifactMetadata {
            filename: filename.into(),
            expected_hash: "00".into(),
            hash_algorithm: HashAlgorithm::Sha256,
            download_url: None,
            relative_executable_path: java.map(str::to_string),
            internal_path: "/analysis/jres/1".into(),
        }
    }

    fn write_tar_gz(path: &Path, name: &str, body: &[u8]) {
        let file = fs::File::create(path).unwrap();
        let mut builder =
            tar::Builder::new(flate2::write::GzEncoder::new(file, flate2::Compression::fast()));
        let mut header = tar::Header::new_gnu();
        header.set_size(body.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, name, body).unwrap();
        builder.into_inner().unwrap().finish().unwrap();
    }

    #[test]
    fn classification_requires_archive_name_and_executable() {
        let cached = PathBuf::from("/cache/h/jre.tar.gz");
        assert_eq!(
            ProvisionedArtifact::classify(cached.clone(), &jre_metadata("jre.tar.gz", Some("bin/java"))),
            ProvisionedArtifact::Archived {
                archive: cached.clone(),
                relative_executable: "bin/java".into()
            }
        );
        assert_eq!(
            ProvisionedArtifact::classify(cached.clone(), &jre_metadata("engine.jar", None)),
            ProvisionedArtifact::Plain(cached.clone())
        );
        assert_eq!(
            ProvisionedArtifact::classify(cached.clone(), &jre_metadata("java", Some("java"))),
            ProvisionedArtifact::Plain(cached)
        );
    }

    #[tokio::test]
    async fn archived_artifact_is_extracted_once_and_reused() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let hash_dir = dir.path().join("h");
        fs::create_dir_all(&hash_dir).unwrap();
        let archive = hash_dir.join("jre.tar.gz");
        write_tar_gz(&archive, "jdk/bin/java", b"#!/bin/sh\n");

        let artifact = ProvisionedArtifact::Archived {
            archive: archive.clone(),
            relative_executable: "/jdk/bin/java".into(),
        };
        let executable = artifact.clone().resolve_executable(&cache).await.unwrap();
        assert_eq!(executable, hash_dir.join("jre.tar.gz_extracted/jdk/bin/java"));
        assert!(executable.is_file());

        // The archive is no longer needed once the tree exists.
        fs::remove_file(&archive).unwrap();
        let again = artifact.resolve_executable(&cache).await.unwrap();
        assert_eq!(again, executable);
        assert_eq!(fs::read_dir(cache.temp_dir()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn missing_executable_inside_archive_is_reported() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let archive = dir.path().join("jre.tar.gz");
        write_tar_gz(&archive, "jdk/release", b"17");

        let err = ProvisionedArtifact::Archived {
            archive,
            relative_executable: "jdk/bin/java".into(),
        }
        .resolve_executable(&cache)
        .await
        .unwrap_err();
        assert!(matches!(err, ProvisionError::MissingExecutable { .. }));
    }

    #[tokio::test]
    async fn executable_path_cannot_leave_extracted_tree() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let hash_dir = dir.path().join("h");
        fs::create_dir_all(&hash_dir).unwrap();
        let archive = hash_dir.join("jre.tar.gz");
        write_tar_gz(&archive, "jdk/bin/java", b"#!/bin/sh\n");
        fs::write(dir.path().join("java"), b"outside").unwrap();

        for relative in ["../../java", "jdk/../../../java", "C:/java"] {
            let err = ProvisionedArtifact::Archived {
                archive: archive.clone(),
                relative_executable: relative.into(),
            }
            .resolve_executable(&cache)
            .await
            .unwrap_err();
            assert!(
                matches!(err, ProvisionError::InvalidExecutablePath { ref path } if path == relative),
                "{relative}: {err:?}"
            );
        }
        assert!(!hash_dir.join("jre.tar.gz_extracted").exists());

        let executable = ProvisionedArtifact::Archived {
            archive,
            relative_executable: "jdk/./lib/../bin/java".into(),
        }
        .resolve_executable(&cache)
        .await
        .unwrap();
        assert_eq!(executable, hash_dir.join("jre.tar.gz_extracted/jdk/bin/java"));
    }
}
