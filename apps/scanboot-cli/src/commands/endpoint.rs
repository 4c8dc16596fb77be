use anyhow::Result;
use scanboot_core::resolve_endpoint;

use crate::config::Settings;

pub fn execute(settings: &Settings, pretty: bool) -> Result<i32> {
    let endpoint = resolve_endpoint(&settings.properties)?;
    super::print_json(&endpoint, pretty)?;
    Ok(0)
}
