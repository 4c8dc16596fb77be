use std::path::{Path, PathBuf};

use scanboot_core::{keys, ConfigError, DownloadCache, Properties};
use serde::Serialize;
use tracing::{info, warn};

use crate::artifact::provision_artifact;
use crate::error::ProvisionError;
use crate::metadata::{ArtifactMetadata, MetadataClient};
use crate::platform::detect_platform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeSource {
    /// `sonar.scanner.javaExePath`.
    Explicit,
    /// Downloaded from the server.
    Provisioned,
    /// Found on this machine.
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JavaRuntime {
    pub executable: PathBuf,
    pub source: RuntimeSource,
    /// Only known for provisioned runtimes.
    pub cache_hit: Option<bool>,
}

pub struct JreProvisioner<'a> {
    cache: &'a DownloadCache,
    client: &'a dyn MetadataClient,
}

impl<'a> JreProvisioner<'a> {
    pub fn new(cache: &'a DownloadCache, client: &'a dyn MetadataClient) -> Self {
        Self { cache, client }
    }

    /// Pick the Java runtime used to launch the engine.
    ///
    /// An explicit executable path wins and must exist. Otherwise the server
    /// is asked for a JRE matching this platform unless provisioning is
    /// disabled; no match falls back to a local installation.
    pub async fn provision(&self, props: &Properties) -> Result<JavaRuntime, ProvisionError> {
        if let Some(explicit) = props.get(keys::JAVA_EXE_PATH) {
            let path = PathBuf::from(explicit);
            if !path.exists() {
                return Err(ConfigError::MissingPath {
                    property: keys::JAVA_EXE_PATH,
                    path,
                }
                .into());
            }
            info!(target: "scanboot::provision", java = %path.display(), "using configured Java executable");
            return Ok(JavaRuntime {
                executable: path,
                source: RuntimeSource::Explicit,
                cache_hit: None,
            });
        }

        if props.get_bool(keys::SKIP_JRE_PROVISIONING).unwrap_or(false) {
            info!(target: "scanboot::provision", "JRE provisioning disabled; using local Java");
            return Ok(local_java_runtime());
        }

        let platform = detect_platform(props);
        let candidates = self
            .client
            .jre_metadata(&platform)
            .await
            .map_err(|source| ProvisionError::Metadata {
                artifact: "JRE",
                source,
            })?;
        let Some(jre) = candidates.first() else {
            warn!(
                target: "scanboot::provision",
                os = %platform.os,
                arch = %platform.arch,
                "no JRE available for this platform; falling back to local Java"
            );
            return Ok(local_java_runtime());
        };

        let metadata = ArtifactMetadata::from(jre);
        let resolved = provision_artifact(self.cache, self.client, &metadata).await?;
        info!(
            target: "scanboot::provision",
            java = %resolved.executable.display(),
            cache_hit = resolved.cache_hit,
            "JRE ready"
        );
        Ok(JavaRuntime {
            executable: resolved.executable,
            source: RuntimeSource::Provisioned,
            cache_hit: Some(resolved.cache_hit),
        })
    }
}

fn java_binary_name() -> &'static str {
    if cfg!(windows) {
        "java.exe"
    } else {
        "java"
    }
}

/// `$JAVA_HOME/bin/java`, else `java` from `PATH`, else the bare name left
/// for the OS to resolve at spawn time.
pub fn local_java_runtime() -> JavaRuntime {
    let executable = std::env::var_os("JAVA_HOME")
        .map(|home| Path::new(&home).join("bin").join(java_binary_name()))
        .filter(|candidate| candidate.is_file())
        .or_else(|| which::which("java").ok())
        .unwrap_or_else(|| PathBuf::from(java_binary_name()));
    JavaRuntime {
        executable,
        source: RuntimeSource::Local,
        cache_hit: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{EngineMetadata, JreMetadata, MetadataError};
    use crate::platform::Platform;
    use async_trait::async_trait;
    use scanboot_core::DownloadError;
    use serial_test::serial;
    use std::sync::Mutex;
    use tempfile::tempdir;

    #[derive(Default)]
    struct NoJreClient {
        asked: Mutex<Vec<Platform>>,
    }

    #[async_trait]
    impl MetadataClient for NoJreClient {
        async fn server_version(&self) -> Result<String, MetadataError> {
            Ok("10.7".into())
        }

        async fn jre_metadata(&self, platform: &Platform) -> Result<Vec<JreMetadata>, MetadataError> {
            self.asked.lock().unwrap().push(platform.clone());
            Ok(Vec::new())
        }

        async fn engine_metadata(&self) -> Result<EngineMetadata, MetadataError> {
            unreachable!("engine metadata is not needed here")
        }

        async fn download_internal(&self, path: &str, _destination: &Path) -> Result<(), DownloadError> {
            unreachable!("unexpected download of {path}")
        }

        async fn download_external(&self, url: &str, _destination: &Path) -> Result<(), DownloadError> {
            unreachable!("unexpected download of {url}")
        }
    }

    fn fake_java_home() -> tempfile::TempDir {
        let home = tempdir().unwrap();
        std::fs::create_dir_all(home.path().join("bin")).unwrap();
        std::fs::write(home.path().join("bin").join(java_binary_name()), b"").unwrap();
        home
    }

    #[tokio::test]
    async fn explicit_java_path_must_exist() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let client = NoJreClient::default();
        let missing = dir.path().join("nope/java");
        let props: Properties = [(keys::JAVA_EXE_PATH, &*missing.to_string_lossy())]
            .into_iter()
            .collect();
        let err = JreProvisioner::new(&cache, &client)
            .provision(&props)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ProvisionError::Config(ConfigError::MissingPath { property, .. }) if property == keys::JAVA_EXE_PATH
        ));
        assert!(client.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn explicit_java_path_short_circuits() {
        let home = fake_java_home();
        let java = home.path().join("bin").join(java_binary_name());
        let cache = DownloadCache::new(home.path().join("cache"));
        let client = NoJreClient::default();
        let props: Properties = [(keys::JAVA_EXE_PATH, &*java.to_string_lossy())]
            .into_iter()
            .collect();
        let runtime = JreProvisioner::new(&cache, &client).provision(&props).await.unwrap();
        assert_eq!(runtime.executable, java);
        assert_eq!(runtime.source, RuntimeSource::Explicit);
        assert!(client.asked.lock().unwrap().is_empty());
    }

    #[tokio::test]
    #[serial]
    async fn no_matching_jre_falls_back_to_java_home() {
        let home = fake_java_home();
        let previous = std::env::var_os("JAVA_HOME");
        std::env::set_var("JAVA_HOME", home.path());

        let cache = DownloadCache::new(home.path().join("cache"));
        let client = NoJreClient::default();
        let props: Properties = [(keys::OS, "linux"), (keys::ARCH, "x64")].into_iter().collect();
        let runtime = JreProvisioner::new(&cache, &client).provision(&props).await;

        match previous {
            Some(value) => std::env::set_var("JAVA_HOME", value),
            None => std::env::remove_var("JAVA_HOME"),
        }
        let runtime = runtime.unwrap();
        assert_eq!(runtime.source, RuntimeSource::Local);
        assert_eq!(runtime.executable, home.path().join("bin").join(java_binary_name()));
        assert_eq!(
            client.asked.lock().unwrap().as_slice(),
            &[Platform {
                os: "linux".into(),
                arch: "x64".into()
            }]
        );
    }

    #[tokio::test]
    #[serial]
    async fn skip_flag_bypasses_the_server() {
        let dir = tempdir().unwrap();
        let cache = DownloadCache::new(dir.path());
        let client = NoJreClient::default();
        let props: Properties = [(keys::SKIP_JRE_PROVISIONING, "true")].into_iter().collect();
        let runtime = JreProvisioner::new(&cache, &client).provision(&props).await.unwrap();
        assert_eq!(runtime.source, RuntimeSource::Local);
        assert!(client.asked.lock().unwrap().is_empty());
    }
}
