use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property keys understood by the bootstrapper.
pub mod keys {
    pub const HOST_URL: &str = "sonar.host.url";
    pub const SONARCLOUD_URL: &str = "sonar.scanner.sonarcloudUrl";
    pub const API_BASE_URL: &str = "sonar.scanner.apiBaseUrl";
    pub const REGION: &str = "sonar.region";
    pub const USER_HOME: &str = "sonar.userHome";
    pub const TOKEN: &str = "sonar.token";
    pub const OS: &str = "sonar.scanner.os";
    pub const ARCH: &str = "sonar.scanner.arch";
    pub const JAVA_EXE_PATH: &str = "sonar.scanner.javaExePath";
    pub const SKIP_JRE_PROVISIONING: &str = "sonar.scanner.skipJreProvisioning";
    pub const ENGINE_JAR_PATH: &str = "sonar.scanner.engineJarPath";
    pub const JAVA_OPTS: &str = "sonar.scanner.javaOpts";
    pub const VERBOSE: &str = "sonar.verbose";
    pub const WAS_JRE_CACHE_HIT: &str = "sonar.scanner.wasJreCacheHit";
    pub const WAS_ENGINE_CACHE_HIT: &str = "sonar.scanner.wasEngineCacheHit";
}

const ENABLED: &[&str] = &["true", "yes", "on", "1"];
const DISABLED: &[&str] = &["false", "no", "off", "0"];

fn one_of(value: &str, words: &[&str]) -> bool {
    words.iter().any(|word| value.eq_ignore_ascii_case(word))
}

/// Ordered string property map passed through the whole bootstrap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Properties(BTreeMap<String, String>);

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trimmed value for `key`; blank values read as absent.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0
            .get(key)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }

    /// Switch-style property. `None` when unset or not a recognised switch
    /// word; matching ignores case.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        let value = self.get(key)?;
        if one_of(value, ENABLED) {
            Some(true)
        } else if one_of(value, DISABLED) {
            Some(false)
        } else {
            None
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Overlay `other` on top of `self`; keys in `other` win.
    pub fn merge(&mut self, other: &Properties) {
        for (key, value) in other.iter() {
            self.0.insert(key.to_string(), value.to_string());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Properties {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}
