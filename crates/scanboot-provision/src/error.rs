use std::io;
use std::path::PathBuf;

use scanboot_core::{ArchiveError, CacheError, ConfigError};

use crate::metadata::MetadataError;

#[derive(Debug, thiserror::Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to fetch {artifact} metadata")]
    Metadata {
        artifact: &'static str,
        #[source]
        source: MetadataError,
    },
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("failed to extract {}", .archive.display())]
    Extract {
        archive: PathBuf,
        #[source]
        source: ArchiveError,
    },
    #[error("executable path '{path}' points outside the extracted archive")]
    InvalidExecutablePath { path: String },
    #[error("executable {} missing from extracted archive", .path.display())]
    MissingExecutable { path: PathBuf },
    #[error(
        "server version {version} does not support JRE and engine provisioning (minimum {minimum}); \
         upgrade the server or use an older scanner"
    )]
    UnsupportedServer { version: String, minimum: String },
    #[error("I/O failure at {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}
