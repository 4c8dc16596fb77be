pub mod endpoint;
pub mod provision;
pub mod run;

use std::sync::Arc;

use anyhow::Result;
use scanboot_core::{resolve_endpoint, DownloadCache};
use scanboot_provision::ScannerEngineLauncher;

use crate::config::Settings;
use crate::http_client::HttpMetadataClient;

/// Resolve the endpoint and wire the HTTP client, cache and launcher together.
pub(crate) fn build_launcher(settings: &Settings) -> Result<ScannerEngineLauncher> {
    let endpoint = resolve_endpoint(&settings.properties)?;
    let client = HttpMetadataClient::new(&settings.http, endpoint.clone(), settings.token())?;
    Ok(ScannerEngineLauncher::new(
        DownloadCache::new(settings.cache_dir()),
        Arc::new(client),
        endpoint,
    ))
}

pub(crate) fn print_json<T: serde::Serialize>(value: &T, pretty: bool) -> Result<()> {
    let text = if pretty {
        serde_json::to_string_pretty(value)?
    } else {
        serde_json::to_string(value)?
    };
    println!("{text}");
    Ok(())
}
