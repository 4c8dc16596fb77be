//! Provisioning primitives for the scanner bootstrapper: content hashing, the
//! shared download cache, archive extraction, endpoint resolution and the
//! subprocess launcher.

pub mod archive;
pub mod cache;
pub mod endpoint;
mod error;
pub mod hasher;
pub mod process;
pub mod properties;

pub use archive::{ArchiveError, ArchiveFormat};
pub use cache::{CacheError, CachedFile, DownloadCache, Downloader};
pub use endpoint::{resolve_endpoint, CloudInstance, Endpoint, CLOUD_INSTANCES};
pub use error::{ConfigError, DownloadError};
pub use hasher::{HashAlgorithm, HashError};
pub use process::{LaunchError, LaunchResult, ProcessLauncher};
pub use properties::{keys, Properties};
