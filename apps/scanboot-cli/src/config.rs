use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use jsonschema::{validator_for, Validator};
use once_cell::sync::Lazy;
use scanboot_core::{keys, Properties};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CONFIG_ENV: &str = "SCANBOOT_CONFIG";
pub const JSON_PARAMS_ENV: &str = "SONAR_SCANNER_JSON_PARAMS";

/// Dedicated environment variables and the property each one sets.
pub const ENV_PROPERTIES: &[(&str, &str)] = &[
    ("SONAR_HOST_URL", keys::HOST_URL),
    ("SONAR_TOKEN", keys::TOKEN),
    ("SONAR_REGION", keys::REGION),
    ("SONAR_USER_HOME", keys::USER_HOME),
    ("SONAR_SCANNER_JAVA_OPTS", keys::JAVA_OPTS),
];

#[derive(Debug, Default, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Scanner properties, lowest precedence.
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
    #[serde(default)]
    pub http: HttpConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct HttpConfig {
    #[serde(default = "default_connect_timeout")]
    #[schemars(range(min = 1))]
    pub connect_timeout_secs: u64,
    /// Whole-request timeout for API calls.
    #[serde(default = "default_timeout")]
    #[schemars(range(min = 1))]
    pub timeout_secs: u64,
    /// Whole-request timeout for artifact downloads.
    #[serde(default = "default_download_timeout")]
    #[schemars(range(min = 1))]
    pub download_timeout_secs: u64,
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_timeout() -> u64 {
    60
}

fn default_download_timeout() -> u64 {
    1800
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
            download_timeout_secs: default_download_timeout(),
        }
    }
}

static CONFIG_SCHEMA: Lazy<Validator> = Lazy::new(|| {
    let schema = schemars::schema_for!(FileConfig);
    let schema_value = serde_json::to_value(&schema).expect("schema value");
    validator_for(&schema_value).expect("valid schema")
});

pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let raw: toml::Value =
        toml::from_str(&content).with_context(|| format!("parsing config {}", path.display()))?;
    let json_value = serde_json::to_value(&raw)?;
    let validation_errors: Vec<_> = CONFIG_SCHEMA
        .iter_errors(&json_value)
        .map(|e| e.to_string())
        .collect();
    if !validation_errors.is_empty() {
        bail!(
            "invalid config {}: {}",
            path.display(),
            validation_errors.join(", ")
        );
    }
    let cfg: FileConfig = toml::from_str(&content)?;
    Ok(cfg)
}

fn parse_json_params(raw: &str) -> Result<Properties> {
    let value: JsonValue =
        serde_json::from_str(raw).with_context(|| format!("{JSON_PARAMS_ENV} is not valid JSON"))?;
    let JsonValue::Object(map) = value else {
        bail!("{JSON_PARAMS_ENV} must be a JSON object");
    };
    map.into_iter()
        .map(|(key, value)| match value {
            JsonValue::String(s) => Ok((key, s)),
            JsonValue::Number(n) => Ok((key, n.to_string())),
            JsonValue::Bool(b) => Ok((key, b.to_string())),
            other => Err(anyhow!(
                "{JSON_PARAMS_ENV}: value of '{key}' must be a string, got {other}"
            )),
        })
        .collect()
}

/// Everything the commands need: merged properties plus transport settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub properties: Properties,
    pub http: HttpConfig,
}

impl Settings {
    /// Layer the config file, `SONAR_SCANNER_JSON_PARAMS`, the dedicated
    /// environment variables and `-D` definitions, later sources winning.
    pub fn assemble(
        config_path: Option<&Path>,
        defines: &[(String, String)],
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let config_path = config_path
            .map(Path::to_path_buf)
            .or_else(|| env(CONFIG_ENV).filter(|v| !v.trim().is_empty()).map(PathBuf::from));
        let file = match config_path {
            Some(path) => load_config(&path)?,
            None => FileConfig::default(),
        };

        let mut properties: Properties = file.properties.into_iter().collect();
        if let Some(raw) = env(JSON_PARAMS_ENV).filter(|v| !v.trim().is_empty()) {
            properties.merge(&parse_json_params(&raw)?);
        }
        for (var, key) in ENV_PROPERTIES {
            if let Some(value) = env(var) {
                properties.insert(*key, value);
            }
        }
        for (key, value) in defines {
            properties.insert(key.as_str(), value.as_str());
        }

        Ok(Self {
            properties,
            http: file.http,
        })
    }

    /// `sonar.userHome`, defaulting to `~/.sonar`.
    pub fn user_home(&self) -> PathBuf {
        if let Some(home) = self.properties.get(keys::USER_HOME) {
            return PathBuf::from(home);
        }
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".sonar"))
            .unwrap_or_else(|| PathBuf::from(".sonar"))
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.user_home().join("cache")
    }

    pub fn verbose(&self) -> bool {
        self.properties.get_bool(keys::VERBOSE).unwrap_or(false)
    }

    pub fn token(&self) -> Option<String> {
        self.properties.get(keys::TOKEN).map(str::to_string)
    }
}
