use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, Response};
use scanboot_core::{DownloadError, Endpoint};
use scanboot_provision::{EngineMetadata, JreMetadata, MetadataClient, MetadataError, Platform};
use serde::de::DeserializeOwned;
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::config::HttpConfig;

const OCTET_STREAM: &str = "application/octet-stream";
const JSON: &str = "application/json";

fn user_agent() -> String {
    format!("scanboot/{}", env!("CARGO_PKG_VERSION"))
}

/// Base client builder with harmonized defaults.
pub fn builder(http: &HttpConfig) -> reqwest::ClientBuilder {
    reqwest::Client::builder()
        .user_agent(user_agent())
        .connect_timeout(Duration::from_secs(http.connect_timeout_secs.max(1)))
        .timeout(Duration::from_secs(http.timeout_secs.max(1)))
        .tcp_keepalive(Duration::from_secs(60))
        .pool_idle_timeout(Duration::from_secs(90))
}

/// `MetadataClient` backed by the server's REST API.
pub struct HttpMetadataClient {
    client: reqwest::Client,
    download_timeout: Duration,
    endpoint: Endpoint,
    token: Option<String>,
}

impl HttpMetadataClient {
    pub fn new(http: &HttpConfig, endpoint: Endpoint, token: Option<String>) -> Result<Self> {
        let client = builder(http).build().context("building http client")?;
        Ok(Self {
            client,
            download_timeout: Duration::from_secs(http.download_timeout_secs.max(1)),
            endpoint,
            token,
        })
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint.api_endpoint.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        match self.token.as_deref() {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, url: &str) -> Result<Response, MetadataError> {
        let response = request.send().await.map_err(|err| MetadataError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        })?;
        if !response.status().is_success() {
            return Err(MetadataError::Status {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        url: &str,
    ) -> Result<T, MetadataError> {
        let response = self.send(request.header(ACCEPT, JSON), url).await?;
        response.json().await.map_err(|err| MetadataError::Decode {
            url: url.to_string(),
            message: err.to_string(),
        })
    }

    async fn stream_to(
        &self,
        request: RequestBuilder,
        url: &str,
        destination: &Path,
    ) -> Result<(), DownloadError> {
        let transport = |err: reqwest::Error| DownloadError::Transport {
            url: url.to_string(),
            message: err.to_string(),
        };
        let write_err = |source: std::io::Error| DownloadError::Write {
            path: destination.to_path_buf(),
            source,
        };

        // The client-wide timeout covers API calls only.
        let response = request
            .header(ACCEPT, OCTET_STREAM)
            .timeout(self.download_timeout)
            .send()
            .await
            .map_err(transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(write_err)?;
        let mut stream = response.bytes_stream();
        let mut total_bytes = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(transport)?;
            file.write_all(&chunk).await.map_err(write_err)?;
            total_bytes += chunk.len() as u64;
        }
        file.flush().await.map_err(write_err)?;
        debug!(
            target: "scanboot::provision",
            url,
            bytes = total_bytes,
            "download complete"
        );
        Ok(())
    }
}

#[async_trait]
impl MetadataClient for HttpMetadataClient {
    async fn server_version(&self) -> Result<String, MetadataError> {
        let url = format!(
            "{}/api/server/version",
            self.endpoint.web_endpoint.trim_end_matches('/')
        );
        let response = self
            .send(self.authorized(self.client.get(&url)), &url)
            .await?;
        let text = response.text().await.map_err(|err| MetadataError::Decode {
            url: url.clone(),
            message: err.to_string(),
        })?;
        Ok(text.trim().to_string())
    }

    async fn jre_metadata(&self, platform: &Platform) -> Result<Vec<JreMetadata>, MetadataError> {
        let url = self.api_url("/analysis/jres");
        let request = self.authorized(
            self.client
                .get(&url)
                .query(&[("os", platform.os.as_str()), ("arch", platform.arch.as_str())]),
        );
        self.get_json(request, &url).await
    }

    async fn engine_metadata(&self) -> Result<EngineMetadata, MetadataError> {
        let url = self.api_url("/analysis/engine");
        let request = self.authorized(self.client.get(&url));
        self.get_json(request, &url).await
    }

    async fn download_internal(&self, path: &str, destination: &Path) -> Result<(), DownloadError> {
        let url = self.api_url(path);
        let request = self.authorized(self.client.get(&url));
        self.stream_to(request, &url, destination).await
    }

    async fn download_external(&self, url: &str, destination: &Path) -> Result<(), DownloadError> {
        self.stream_to(self.client.get(url), url, destination).await
    }
}
