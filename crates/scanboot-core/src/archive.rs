//! Archive extraction for provisioned runtimes.
//!
//! Every entry path is normalised lexically before anything touches the disk:
//! `\` is treated as `/`, empty and `.` components are dropped, and `..` pops
//! the previous component. An entry that is absolute, carries a drive prefix,
//! or pops past the archive root is a zip-slip and aborts the extraction
//! immediately. Tar link targets get the same treatment, resolved against the
//! directory of the link itself.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

impl ArchiveFormat {
    /// Guess the format from a file name.
    pub fn detect(file_name: &str) -> Option<Self> {
        let lowered = file_name.to_ascii_lowercase();
        if lowered.ends_with(".zip") {
            Some(ArchiveFormat::Zip)
        } else if lowered.ends_with(".tar.gz") || lowered.ends_with(".tgz") {
            Some(ArchiveFormat::TarGz)
        } else {
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("archive entry '{entry}' would be extracted outside the target directory (zip-slip)")]
    ZipSlip { entry: String },
    #[error("unsupported archive format: {}", .path.display())]
    UnsupportedFormat { path: PathBuf },
    #[error("malformed zip archive {}", .path.display())]
    Zip {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },
    #[error("I/O failure at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn io_err(path: &Path) -> impl FnOnce(io::Error) -> ArchiveError + '_ {
    move |source| ArchiveError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Extract `archive` into `target_dir`, choosing the format from its name.
pub fn extract(archive: &Path, target_dir: &Path) -> Result<(), ArchiveError> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    match ArchiveFormat::detect(&name) {
        Some(ArchiveFormat::Zip) => extract_zip(archive, target_dir),
        Some(ArchiveFormat::TarGz) => extract_tar_gz(archive, target_dir),
        None => Err(ArchiveError::UnsupportedFormat {
            path: archive.to_path_buf(),
        }),
    }
}

pub fn extract_zip(archive: &Path, target_dir: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(target_dir).map_err(io_err(target_dir))?;
    let file = File::open(archive).map_err(io_err(archive))?;
    let mut zip = zip::ZipArchive::new(file).map_err(|source| ArchiveError::Zip {
        path: archive.to_path_buf(),
        source,
    })?;

    for index in 0..zip.len() {
        let mut entry = zip.by_index(index).map_err(|source| ArchiveError::Zip {
            path: archive.to_path_buf(),
            source,
        })?;
        let name = entry.name().to_string();
        let dest = resolve_entry(target_dir, &name)?;

        if entry.is_dir() {
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
            continue;
        }
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).map_err(io_err(parent))?;
        }
        let mut out = File::create(&dest).map_err(io_err(&dest))?;
        io::copy(&mut entry, &mut out).map_err(io_err(&dest))?;
        drop(out);
        if let Some(mode) = entry.unix_mode() {
            apply_mode(&dest, mode)?;
        }
    }
    debug!(
        target: "scanboot::archive",
        archive = %archive.display(),
        target_dir = %target_dir.display(),
        entries = zip.len(),
        "zip archive extracted"
    );
    Ok(())
}

pub fn extract_tar_gz(archive: &Path, target_dir: &Path) -> Result<(), ArchiveError> {
    fs::create_dir_all(target_dir).map_err(io_err(target_dir))?;
    let file = File::open(archive).map_err(io_err(archive))?;
    let mut tar = tar::Archive::new(GzDecoder::new(file));
    tar.set_preserve_permissions(true);

    let mut count = 0usize;
    for entry in tar.entries().map_err(io_err(archive))? {
        let mut entry = entry.map_err(io_err(archive))?;
        let name = entry
            .path()
            .map_err(io_err(archive))?
            .to_string_lossy()
            .into_owned();
        let dest = resolve_entry(target_dir, &name)?;

        let kind = entry.header().entry_type();
        if kind.is_symlink() || kind.is_hard_link() {
            let link = entry
                .link_name()
                .map_err(io_err(archive))?
                .map(|l| l.to_string_lossy().into_owned())
                .unwrap_or_default();
            check_link_target(&name, &link, kind.is_symlink())?;
        }
        if kind.is_dir() {
            fs::create_dir_all(&dest).map_err(io_err(&dest))?;
            continue;
        }
        let unpacked = entry.unpack_in(target_dir).map_err(io_err(&dest))?;
        if !unpacked {
            return Err(ArchiveError::ZipSlip { entry: name });
        }
        count += 1;
    }
    debug!(
        target: "scanboot::archive",
        archive = %archive.display(),
        target_dir = %target_dir.display(),
        entries = count,
        "tar.gz archive extracted"
    );
    Ok(())
}

/// Lexically normalise an archive entry name into a relative path.
/// Returns `None` when the entry would escape its root.
/// Lexically normalise an archive-relative path. `None` when the name is
/// absolute, carries a drive prefix, or climbs above the archive root.
pub fn normalize_entry(name: &str) -> Option<PathBuf> {
    let unified = name.replace('\\', "/");
    if unified.starts_with('/') {
        return None;
    }
    let mut parts: Vec<&str> = Vec::new();
    for component in unified.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop()?;
            }
            other => {
                if other.contains(':') {
                    return None;
                }
                parts.push(other);
            }
        }
    }
    Some(parts.iter().collect())
}

fn resolve_entry(target_dir: &Path, name: &str) -> Result<PathBuf, ArchiveError> {
    match normalize_entry(name) {
        Some(relative) => Ok(target_dir.join(relative)),
        None => Err(ArchiveError::ZipSlip {
            entry: name.to_string(),
        }),
    }
}

fn check_link_target(entry: &str, link: &str, relative_to_entry: bool) -> Result<(), ArchiveError> {
    let escapes = if relative_to_entry {
        let unified = entry.replace('\\', "/");
        let parent = match unified.trim_end_matches('/').rsplit_once('/') {
            Some((parent, _)) => parent.to_string(),
            None => String::new(),
        };
        link.starts_with('/') || normalize_entry(&format!("{parent}/{link}")).is_none()
    } else {
        normalize_entry(link).is_none()
    };
    if escapes {
        return Err(ArchiveError::ZipSlip {
            entry: entry.to_string(),
        });
    }
    Ok(())
}

#[cfg(unix)]
fn apply_mode(path: &Path, mode: u32) -> Result<(), ArchiveError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode & 0o7777)).map_err(io_err(path))
}

#[cfg(not(unix))]
fn apply_mode(_path: &Path, _mode: u32) -> Result<(), ArchiveError> {
    Ok(())
}
