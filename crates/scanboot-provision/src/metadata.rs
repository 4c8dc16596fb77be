//! Artifact metadata and the REST collaborator that serves it.

use std::path::Path;

use async_trait::async_trait;
use scanboot_core::{DownloadError, Downloader, HashAlgorithm};
use serde::{Deserialize, Serialize};

use crate::platform::Platform;

/// One JRE candidate returned by `GET /analysis/jres`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JreMetadata {
    pub id: String,
    pub filename: String,
    pub sha256: String,
    /// Path of the java executable inside the extracted archive.
    pub java_path: String,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub arch: Option<String>,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// Current engine as returned by `GET /analysis/engine`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetadata {
    pub filename: String,
    pub sha256: String,
    #[serde(default)]
    pub download_url: Option<String>,
}

/// What the provisioning code needs to know about any artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMetadata {
    pub filename: String,
    pub expected_hash: String,
    pub hash_algorithm: HashAlgorithm,
    pub download_url: Option<String>,
    /// Executable inside the archive; `None` for plain files.
    pub relative_executable_path: Option<String>,
    /// API-relative path serving the bytes when no `download_url` is given.
    pub internal_path: String,
}

impl ArtifactMetadata {
    pub fn source(&self) -> ArtifactSource {
        match self.download_url.as_deref().map(str::trim) {
            Some(url) if !url.is_empty() => ArtifactSource::External {
                url: url.to_string(),
            },
            _ => ArtifactSource::Internal {
                path: self.internal_path.clone(),
            },
        }
    }
}

impl From<&JreMetadata> for ArtifactMetadata {
    fn from(jre: &JreMetadata) -> Self {
        Self {
            filename: jre.filename.clone(),
            expected_hash: jre.sha256.clone(),
            hash_algorithm: HashAlgorithm::Sha256,
            download_url: jre.download_url.clone(),
            relative_executable_path: Some(jre.java_path.clone()),
            internal_path: format!("/analysis/jres/{}", jre.id),
        }
    }
}

impl From<&EngineMetadata> for ArtifactMetadata {
    fn from(engine: &EngineMetadata) -> Self {
        Self {
            filename: engine.filename.clone(),
            expected_hash: engine.sha256.clone(),
            hash_algorithm: HashAlgorithm::Sha256,
            download_url: engine.download_url.clone(),
            relative_executable_path: None,
            internal_path: "/analysis/engine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactSource {
    /// Served by the API under this path.
    Internal { path: String },
    /// Absolute URL outside the API; fetched without credentials.
    External { url: String },
}

#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("unexpected response from {url}: {message}")]
    Decode { url: String, message: String },
}

/// REST endpoints the provisioning code depends on.
#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Plain-text version of the server.
    async fn server_version(&self) -> Result<String, MetadataError>;

    /// JRE candidates for `platform`; empty when none match.
    async fn jre_metadata(&self, platform: &Platform) -> Result<Vec<JreMetadata>, MetadataError>;

    async fn engine_metadata(&self) -> Result<EngineMetadata, MetadataError>;

    /// Stream the bytes at API-relative `path` into `destination`.
    async fn download_internal(&self, path: &str, destination: &Path) -> Result<(), DownloadError>;

    /// Stream the bytes at absolute `url` into `destination`.
    async fn download_external(&self, url: &str, destination: &Path) -> Result<(), DownloadError>;
}

/// Adapts a [`MetadataClient`] to the cache's [`Downloader`] for one artifact.
pub struct ArtifactDownloader<'a> {
    client: &'a dyn MetadataClient,
    source: ArtifactSource,
}

impl<'a> ArtifactDownloader<'a> {
    pub fn new(client: &'a dyn MetadataClient, source: ArtifactSource) -> Self {
        Self { client, source }
    }
}

#[async_trait]
impl Downloader for ArtifactDownloader<'_> {
    async fn download(&self, _filename: &str, destination: &Path) -> Result<(), DownloadError> {
        match &self.source {
            ArtifactSource::Internal { path } => {
                self.client.download_internal(path, destination).await
            }
            ArtifactSource::External { url } => self.client.download_external(url, destination).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jre_payload_deserializes_from_camel_case() {
        let raw = r#"[{
            "id": "jre-17-linux",
            "filename": "jre17.tar.gz",
            "sha256": "abc",
            "javaPath": "jdk-17/bin/java",
            "os": "linux",
            "arch": "x64"
        }]"#;
        let parsed: Vec<JreMetadata> = serde_json::from_str(raw).unwrap();
        let metadata = ArtifactMetadata::from(&parsed[0]);
        assert_eq!(metadata.relative_executable_path.as_deref(), Some("jdk-17/bin/java"));
        assert_eq!(metadata.internal_path, "/analysis/jres/jre-17-linux");
        assert_eq!(
            metadata.source(),
            ArtifactSource::Internal {
                path: "/analysis/jres/jre-17-linux".into()
            }
        );
    }

    #[test]
    fn download_url_selects_external_source() {
        let engine = EngineMetadata {
            filename: "engine.jar".into(),
            sha256: "def".into(),
            download_url: Some("https://cdn.example.com/engine.jar".into()),
        };
        let metadata = ArtifactMetadata::from(&engine);
        assert_eq!(
            metadata.source(),
            ArtifactSource::External {
                url: "https://cdn.example.com/engine.jar".into()
            }
        );
        assert_eq!(metadata.relative_executable_path, None);

        let blank = EngineMetadata {
            download_url: Some("  ".into()),
            ..engine
        };
        assert!(matches!(
            ArtifactMetadata::from(&blank).source(),
            ArtifactSource::Internal { .. }
        ));
    }
}
