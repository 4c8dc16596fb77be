use anyhow::{Context, Result};

use crate::config::Settings;

/// Provision the JRE and engine without launching anything.
pub async fn execute(settings: &Settings, pretty: bool) -> Result<i32> {
    let launcher = super::build_launcher(settings)?;
    launcher.ensure_server_supported().await?;
    let scanner = launcher
        .provision(&settings.properties)
        .await
        .context("provisioning scanner")?;
    super::print_json(&scanner, pretty)?;
    Ok(0)
}
