#![cfg(unix)]

use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use flate2::write::GzEncoder;
use flate2::Compression;
use scanboot_core::hasher::digest_bytes;
use scanboot_core::{
    keys, DownloadCache, DownloadError, Endpoint, HashAlgorithm, ProcessLauncher, Properties,
};
use scanboot_provision::{
    EngineError, EngineMetadata, JreMetadata, MetadataClient, MetadataError, Platform,
    ProvisionError, ScannerEngineLauncher,
};
use tempfile::tempdir;

const FAKE_JAVA: &str = r#"#!/bin/sh
cat > "$SCANBOOT_CAPTURE"
echo "$@" > "$SCANBOOT_CAPTURE.args"
echo '{"level":"INFO","message":"analysis done"}'
exit ${SCANBOOT_EXIT:-0}
"#;

const ENGINE_JAR: &[u8] = b"PK\x03\x04 not really a jar";

fn jre_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    let mut header = tar::Header::new_gnu();
    header.set_size(FAKE_JAVA.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, "jre/bin/java", FAKE_JAVA.as_bytes())
        .unwrap();
    builder.into_inner().unwrap().finish().unwrap()
}

struct FakeServer {
    version: String,
    jre: Vec<u8>,
    downloads: Mutex<Vec<String>>,
}

impl FakeServer {
    fn new(version: &str) -> Self {
        Self {
            version: version.to_string(),
            jre: jre_archive(),
            downloads: Mutex::new(Vec::new()),
        }
    }

    fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl MetadataClient for FakeServer {
    async fn server_version(&self) -> Result<String, MetadataError> {
        Ok(self.version.clone())
    }

    async fn jre_metadata(&self, platform: &Platform) -> Result<Vec<JreMetadata>, MetadataError> {
        assert_eq!(platform.os, "linux");
        assert_eq!(platform.arch, "x64");
        Ok(vec![JreMetadata {
            id: "jre-17".into(),
            filename: "jre-17.tar.gz".into(),
            sha256: digest_bytes(&self.jre, HashAlgorithm::Sha256),
            java_path: "jre/bin/java".into(),
            os: Some("linux".into()),
            arch: Some("x64".into()),
            download_url: None,
        }])
    }

    async fn engine_metadata(&self) -> Result<EngineMetadata, MetadataError> {
        Ok(EngineMetadata {
            filename: "scanner-engine.jar".into(),
            sha256: digest_bytes(ENGINE_JAR, HashAlgorithm::Sha256),
            download_url: None,
        })
    }

    async fn download_internal(&self, path: &str, destination: &Path) -> Result<(), DownloadError> {
        self.downloads.lock().unwrap().push(path.to_string());
        let bytes = match path {
            "/analysis/jres/jre-17" => self.jre.as_slice(),
            "/analysis/engine" => ENGINE_JAR,
            other => {
                return Err(DownloadError::Status {
                    url: other.to_string(),
                    status: 404,
                })
            }
        };
        std::fs::write(destination, bytes).map_err(|source| DownloadError::Write {
            path: destination.to_path_buf(),
            source,
        })
    }

    async fn download_external(&self, url: &str, _destination: &Path) -> Result<(), DownloadError> {
        Err(DownloadError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

fn self_hosted() -> Endpoint {
    Endpoint {
        web_endpoint: "https://sonar.example.com".into(),
        api_endpoint: "https://sonar.example.com/api/v2".into(),
        is_cloud: false,
        region_label: None,
    }
}

fn props() -> Properties {
    [
        (keys::OS, "linux"),
        (keys::ARCH, "x64"),
        ("sonar.projectKey", "demo"),
    ]
    .into_iter()
    .collect()
}

#[tokio::test]
async fn provisions_and_runs_engine_then_reuses_cache() {
    let home = tempdir().unwrap();
    let capture = home.path().join("stdin.json");
    let server = Arc::new(FakeServer::new("10.7.0.96327"));
    let launcher = ScannerEngineLauncher::new(
        DownloadCache::new(home.path().join("cache")),
        server.clone(),
        self_hosted(),
    )
    .with_process_launcher(
        ProcessLauncher::new().with_env("SCANBOOT_CAPTURE", capture.to_string_lossy()),
    );

    let result = launcher.run(&props()).await.expect("engine runs");
    assert!(result.succeeded);
    assert_eq!(
        server.downloads(),
        vec!["/analysis/jres/jre-17".to_string(), "/analysis/engine".to_string()]
    );

    let input: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&capture).unwrap()).unwrap();
    let value_of = |key: &str| {
        input["scannerProperties"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["key"] == key)
            .and_then(|p| p["value"].as_str().map(str::to_string))
    };
    assert_eq!(value_of("sonar.projectKey").as_deref(), Some("demo"));
    assert_eq!(
        value_of(keys::API_BASE_URL).as_deref(),
        Some("https://sonar.example.com/api/v2")
    );
    assert_eq!(value_of(keys::WAS_JRE_CACHE_HIT).as_deref(), Some("false"));
    assert_eq!(value_of(keys::WAS_ENGINE_CACHE_HIT).as_deref(), Some("false"));

    let args = std::fs::read_to_string(home.path().join("stdin.json.args")).unwrap();
    assert!(args.starts_with("-jar "));
    assert!(args.trim_end().ends_with("scanner-engine.jar"));

    let again = launcher.run(&props()).await.expect("second run");
    assert!(again.succeeded);
    assert_eq!(server.downloads().len(), 2, "second run is served from cache");
    let input = std::fs::read_to_string(&capture).unwrap();
    assert!(input.contains(r#"{"key":"sonar.scanner.wasJreCacheHit","value":"true"}"#));
    assert!(input.contains(r#"{"key":"sonar.scanner.wasEngineCacheHit","value":"true"}"#));
}

#[tokio::test]
async fn engine_failure_is_a_result() {
    let home = tempdir().unwrap();
    let capture = home.path().join("stdin.json");
    let server = Arc::new(FakeServer::new("10.6"));
    let launcher = ScannerEngineLauncher::new(
        DownloadCache::new(home.path().join("cache")),
        server,
        self_hosted(),
    )
    .with_process_launcher(
        ProcessLauncher::new()
            .with_env("SCANBOOT_CAPTURE", capture.to_string_lossy())
            .with_env("SCANBOOT_EXIT", "4"),
    );

    let result = launcher.run(&props()).await.expect("launch itself succeeds");
    assert!(!result.succeeded);
    assert_eq!(result.exit_code, 4);
}

#[tokio::test]
async fn old_server_is_rejected_before_any_download() {
    let home = tempdir().unwrap();
    let server = Arc::new(FakeServer::new("9.9.4"));
    let launcher = ScannerEngineLauncher::new(
        DownloadCache::new(home.path().join("cache")),
        server.clone(),
        self_hosted(),
    );

    let err = launcher.run(&props()).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::Provision(ProvisionError::UnsupportedServer { .. })
    ));
    assert!(server.downloads().is_empty());
}
