use serde::Serialize;
use url::Url;

use crate::error::ConfigError;
use crate::properties::{keys, Properties};

/// Where the scanner talks to. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Endpoint {
    pub web_endpoint: String,
    pub api_endpoint: String,
    pub is_cloud: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_label: Option<String>,
}

impl Endpoint {
    fn server(web: &str) -> Self {
        let web = web.trim_end_matches('/').to_string();
        let api_endpoint = format!("{web}/api/v2");
        Self {
            web_endpoint: web,
            api_endpoint,
            is_cloud: false,
            region_label: None,
        }
    }
}

/// An official cloud deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloudInstance {
    /// Region code used in `sonar.region`; `None` for the default instance.
    pub region: Option<&'static str>,
    pub web_endpoint: &'static str,
    pub api_endpoint: &'static str,
}

impl CloudInstance {
    pub const GLOBAL: CloudInstance = CloudInstance {
        region: None,
        web_endpoint: "https://sonarcloud.io",
        api_endpoint: "https://api.sonarcloud.io",
    };

    pub const US: CloudInstance = CloudInstance {
        region: Some("us"),
        web_endpoint: "https://sonarqube.us",
        api_endpoint: "https://api.sonarqube.us",
    };

    pub fn endpoint(&self) -> Endpoint {
        Endpoint {
            web_endpoint: self.web_endpoint.to_string(),
            api_endpoint: self.api_endpoint.to_string(),
            is_cloud: true,
            region_label: self.region.map(str::to_string),
        }
    }

    fn matches(&self, url: &str) -> bool {
        url.trim_end_matches('/')
            .eq_ignore_ascii_case(self.web_endpoint)
    }
}

pub const CLOUD_INSTANCES: &[CloudInstance] = &[CloudInstance::GLOBAL, CloudInstance::US];

fn instance_for_url(url: &str) -> Option<&'static CloudInstance> {
    CLOUD_INSTANCES.iter().find(|instance| instance.matches(url))
}

fn instance_for_region(region: &str) -> Option<&'static CloudInstance> {
    CLOUD_INSTANCES
        .iter()
        .find(|instance| instance.region.is_some_and(|code| code.eq_ignore_ascii_case(region)))
}

fn valid_regions() -> String {
    CLOUD_INSTANCES
        .iter()
        .filter_map(|instance| instance.region)
        .map(|code| format!("'{code}'"))
        .collect::<Vec<_>>()
        .join(", ")
}

fn validated_url<'a>(property: &'static str, value: &'a str) -> Result<&'a str, ConfigError> {
    let parsed = Url::parse(value).map_err(|err| ConfigError::InvalidUrl {
        property,
        value: value.to_string(),
        reason: err.to_string(),
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidUrl {
            property,
            value: value.to_string(),
            reason: format!("unsupported scheme '{}'", parsed.scheme()),
        });
    }
    Ok(value)
}

/// Cloud match for `url`, checked against an explicit region when one was
/// given. A region that names a different instance, or any region paired
/// with a self-hosted URL, is a conflict.
fn match_cloud(
    url: &str,
    url_property: &'static str,
    region: Option<&'static CloudInstance>,
) -> Result<Option<&'static CloudInstance>, ConfigError> {
    let matched = instance_for_url(url);
    match (matched, region) {
        (Some(found), Some(wanted)) if found != wanted => Err(ConfigError::Conflict {
            first: keys::REGION,
            second: url_property,
        }),
        (None, Some(_)) => Err(ConfigError::Conflict {
            first: keys::REGION,
            second: url_property,
        }),
        (matched, _) => Ok(matched),
    }
}

/// Decide which server or cloud instance the scanner talks to.
pub fn resolve_endpoint(props: &Properties) -> Result<Endpoint, ConfigError> {
    let region = match props.get(keys::REGION) {
        Some(code) => Some(instance_for_region(code).ok_or_else(|| ConfigError::InvalidRegion {
            property: keys::REGION,
            value: code.to_string(),
            valid: valid_regions(),
        })?),
        None => None,
    };

    if let Some(host) = props.get(keys::HOST_URL) {
        let host = validated_url(keys::HOST_URL, host)?;
        return Ok(match match_cloud(host, keys::HOST_URL, region)? {
            Some(instance) => instance.endpoint(),
            None => Endpoint::server(host),
        });
    }

    if let Some(cloud) = props.get(keys::SONARCLOUD_URL) {
        let cloud = validated_url(keys::SONARCLOUD_URL, cloud)?;
        if let Some(instance) = match_cloud(cloud, keys::SONARCLOUD_URL, region)? {
            return Ok(instance.endpoint());
        }
        let api = props
            .get(keys::API_BASE_URL)
            .ok_or(ConfigError::MissingProperty {
                required: keys::API_BASE_URL,
                given: keys::SONARCLOUD_URL,
            })?;
        let api = validated_url(keys::API_BASE_URL, api)?;
        return Ok(Endpoint {
            web_endpoint: cloud.to_string(),
            api_endpoint: api.to_string(),
            is_cloud: true,
            region_label: None,
        });
    }

    if props.get(keys::API_BASE_URL).is_some() {
        return Err(ConfigError::OrphanProperty {
            given: keys::API_BASE_URL,
            required: keys::SONARCLOUD_URL,
        });
    }

    Ok(region.unwrap_or(&CloudInstance::GLOBAL).endpoint())
}
