use anyhow::{Context, Result};
use tracing::info;

use crate::config::Settings;

pub async fn execute(settings: &Settings) -> Result<i32> {
    let launcher = super::build_launcher(settings)?;
    let endpoint = launcher.endpoint();
    info!(
        target: "scanboot::provision",
        web = %endpoint.web_endpoint,
        api = %endpoint.api_endpoint,
        cloud = endpoint.is_cloud,
        "resolved endpoint"
    );
    let result = launcher
        .run(&settings.properties)
        .await
        .context("running scanner engine")?;
    Ok(if result.succeeded { 0 } else { 1 })
}
