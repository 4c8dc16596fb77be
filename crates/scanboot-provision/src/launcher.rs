//! Provision a runtime and engine, then run the engine as a child process.

use std::sync::Arc;

use scanboot_core::{
    keys, DownloadCache, Endpoint, LaunchError, LaunchResult, ProcessLauncher, Properties,
};
use semver::Version;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, trace, warn};

use crate::engine::{EngineArtifact, EngineProvisioner};
use crate::error::ProvisionError;
use crate::jre::{JavaRuntime, JreProvisioner};
use crate::metadata::MetadataClient;

/// Oldest server that serves JRE and engine metadata.
pub const MINIMUM_SERVER_VERSION: Version = Version::new(10, 6, 0);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Provision(#[from] ProvisionError),
    #[error("failed to encode scanner engine input")]
    Input(#[from] serde_json::Error),
    #[error(transparent)]
    Launch(#[from] LaunchError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvisionedScanner {
    pub java: JavaRuntime,
    pub engine: EngineArtifact,
}

#[derive(Serialize)]
struct EngineInput<'a> {
    #[serde(rename = "scannerProperties")]
    scanner_properties: Vec<ScannerProperty<'a>>,
}

#[derive(Serialize)]
struct ScannerProperty<'a> {
    key: &'a str,
    value: &'a str,
}

/// Structured log record the engine prints on stdout.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct EngineLogRecord {
    pub level: String,
    pub message: String,
    #[serde(default)]
    pub stacktrace: Option<String>,
}

pub struct ScannerEngineLauncher {
    cache: DownloadCache,
    client: Arc<dyn MetadataClient>,
    endpoint: Endpoint,
    launcher: ProcessLauncher,
}

impl ScannerEngineLauncher {
    pub fn new(cache: DownloadCache, client: Arc<dyn MetadataClient>, endpoint: Endpoint) -> Self {
        Self {
            cache,
            client,
            endpoint,
            launcher: ProcessLauncher::new(),
        }
    }

    pub fn with_process_launcher(mut self, launcher: ProcessLauncher) -> Self {
        self.launcher = launcher;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Self-hosted servers older than [`MINIMUM_SERVER_VERSION`] cannot
    /// provision anything.
    pub async fn ensure_server_supported(&self) -> Result<(), ProvisionError> {
        if self.endpoint.is_cloud {
            return Ok(());
        }
        let version = self
            .client
            .server_version()
            .await
            .map_err(|source| ProvisionError::Metadata {
                artifact: "server version",
                source,
            })?;
        check_server_version(&version)
    }

    pub async fn provision(&self, props: &Properties) -> Result<ProvisionedScanner, ProvisionError> {
        let client = self.client.as_ref();
        let java = JreProvisioner::new(&self.cache, client).provision(props).await?;
        let engine = EngineProvisioner::new(&self.cache, client)
            .provision(props)
            .await?;
        Ok(ProvisionedScanner { java, engine })
    }

    /// Run a provisioned engine. A non-zero exit is reported through the
    /// returned [`LaunchResult`], not as an error.
    pub async fn launch(
        &self,
        scanner: &ProvisionedScanner,
        props: &Properties,
    ) -> Result<LaunchResult, EngineError> {
        let args = engine_args(props, scanner);
        let input = engine_input(props, &self.endpoint, scanner)?;
        info!(
            target: "scanboot::engine",
            java = %scanner.java.executable.display(),
            jar = %scanner.engine.jar.display(),
            "starting scanner engine"
        );
        let result = self
            .launcher
            .execute(&scanner.java.executable, &args, Some(&input), relay_engine_line)
            .await?;
        if result.succeeded {
            info!(target: "scanboot::engine", "scanner engine finished");
        } else {
            error!(
                target: "scanboot::engine",
                exit_code = result.exit_code,
                "scanner engine failed"
            );
        }
        Ok(result)
    }

    /// Version gate, provisioning and launch in one go.
    pub async fn run(&self, props: &Properties) -> Result<LaunchResult, EngineError> {
        self.ensure_server_supported().await?;
        let scanner = self.provision(props).await?;
        self.launch(&scanner, props).await
    }
}

/// Compare a server version string against [`MINIMUM_SERVER_VERSION`].
/// Only the leading numeric components count, so `10.6.0.92116` is 10.6.0.
/// A version that cannot be read at all is let through.
pub fn check_server_version(raw: &str) -> Result<(), ProvisionError> {
    let Some(version) = parse_server_version(raw) else {
        debug!(
            target: "scanboot::provision",
            version = raw,
            "unrecognised server version; assuming provisioning is supported"
        );
        return Ok(());
    };
    if version < MINIMUM_SERVER_VERSION {
        return Err(ProvisionError::UnsupportedServer {
            version: raw.trim().to_string(),
            minimum: MINIMUM_SERVER_VERSION.to_string(),
        });
    }
    Ok(())
}

fn parse_server_version(raw: &str) -> Option<Version> {
    let mut parts = raw
        .trim()
        .split('.')
        .map(|part| part.parse::<u64>().ok());
    let major = parts.next().flatten()?;
    let minor = parts.next().flatten().unwrap_or(0);
    let patch = parts.next().flatten().unwrap_or(0);
    Some(Version::new(major, minor, patch))
}

fn engine_args(props: &Properties, scanner: &ProvisionedScanner) -> Vec<String> {
    let mut args: Vec<String> = props
        .get(keys::JAVA_OPTS)
        .map(|opts| opts.split_whitespace().map(str::to_string).collect())
        .unwrap_or_default();
    args.push("-jar".to_string());
    args.push(scanner.engine.jar.to_string_lossy().into_owned());
    args
}

fn cache_hit_flag(hit: Option<bool>) -> &'static str {
    match hit {
        Some(true) => "true",
        Some(false) => "false",
        None => "disabled",
    }
}

/// JSON document written to the engine's stdin.
pub fn engine_input(
    props: &Properties,
    endpoint: &Endpoint,
    scanner: &ProvisionedScanner,
) -> serde_json::Result<String> {
    let mut effective = props.clone();
    effective.insert(keys::HOST_URL, endpoint.web_endpoint.as_str());
    effective.insert(keys::API_BASE_URL, endpoint.api_endpoint.as_str());
    effective.insert(keys::WAS_JRE_CACHE_HIT, cache_hit_flag(scanner.java.cache_hit));
    effective.insert(
        keys::WAS_ENGINE_CACHE_HIT,
        cache_hit_flag(scanner.engine.cache_hit),
    );
    let input = EngineInput {
        scanner_properties: effective
            .iter()
            .map(|(key, value)| ScannerProperty { key, value })
            .collect(),
    };
    serde_json::to_string(&input)
}

pub fn parse_engine_line(line: &str) -> Option<EngineLogRecord> {
    let trimmed = line.trim_start();
    if !trimmed.starts_with('{') {
        return None;
    }
    serde_json::from_str(trimmed).ok()
}

/// Forward one engine stdout line to tracing at the level it asks for.
pub fn relay_engine_line(line: &str) {
    let Some(record) = parse_engine_line(line) else {
        info!(target: "scanboot::engine", "{line}");
        return;
    };
    let message = match record.stacktrace.as_deref() {
        Some(trace) if !trace.is_empty() => format!("{}\n{trace}", record.message),
        _ => record.message,
    };
    match record.level.to_ascii_uppercase().as_str() {
        "ERROR" => error!(target: "scanboot::engine", "{message}"),
        "WARN" | "WARNING" => warn!(target: "scanboot::engine", "{message}"),
        "DEBUG" => debug!(target: "scanboot::engine", "{message}"),
        "TRACE" => trace!(target: "scanboot::engine", "{message}"),
        _ => info!(target: "scanboot::engine", "{message}"),
    }
}
