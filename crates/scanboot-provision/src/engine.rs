use std::path::PathBuf;

use scanboot_core::{keys, ConfigError, DownloadCache, Properties};
use serde::Serialize;
use tracing::info;

use crate::artifact::provision_artifact;
use crate::error::ProvisionError;
use crate::metadata::{ArtifactMetadata, MetadataClient};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineArtifact {
    pub jar: PathBuf,
    /// `None` when the jar came from `sonar.scanner.engineJarPath`.
    pub cache_hit: Option<bool>,
}

pub struct EngineProvisioner<'a> {
    cache: &'a DownloadCache,
    client: &'a dyn MetadataClient,
}

impl<'a> EngineProvisioner<'a> {
    pub fn new(cache: &'a DownloadCache, client: &'a dyn MetadataClient) -> Self {
        Self { cache, client }
    }

    pub async fn provision(&self, props: &Properties) -> Result<EngineArtifact, ProvisionError> {
        if let Some(explicit) = props.get(keys::ENGINE_JAR_PATH) {
            let jar = PathBuf::from(explicit);
            if !jar.is_file() {
                return Err(ConfigError::MissingPath {
                    property: keys::ENGINE_JAR_PATH,
                    path: jar,
                }
                .into());
            }
            info!(target: "scanboot::provision", jar = %jar.display(), "using configured scanner engine");
            return Ok(EngineArtifact {
                jar,
                cache_hit: None,
            });
        }

        let engine = self
            .client
            .engine_metadata()
            .await
            .map_err(|source| ProvisionError::Metadata {
                artifact: "scanner engine",
                source,
            })?;
        let metadata = ArtifactMetadata::from(&engine);
        let resolved = provision_artifact(self.cache, self.client, &metadata).await?;
        info!(
            target: "scanboot::provision",
            jar = %resolved.executable.display(),
            cache_hit = resolved.cache_hit,
            "scanner engine ready"
        );
        Ok(EngineArtifact {
            jar: resolved.executable,
            cache_hit: Some(resolved.cache_hit),
        })
    }
}
