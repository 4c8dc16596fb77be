use std::io;
use std::path::PathBuf;

/// User-fixable configuration problems. Every variant names the properties
/// involved so the message can be acted on directly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Inconsistent values for properties {first} and {second}. Please only specify one of the two properties."
    )]
    Conflict {
        first: &'static str,
        second: &'static str,
    },
    #[error("Invalid region '{value}' in property {property}. Valid regions are: {valid}")]
    InvalidRegion {
        property: &'static str,
        value: String,
        valid: String,
    },
    #[error("Property {required} is required when {given} is set to a custom value")]
    MissingProperty {
        required: &'static str,
        given: &'static str,
    },
    #[error("Property {given} cannot be used without {required}")]
    OrphanProperty {
        given: &'static str,
        required: &'static str,
    },
    #[error("Invalid URL '{value}' in property {property}: {reason}")]
    InvalidUrl {
        property: &'static str,
        value: String,
        reason: String,
    },
    #[error("Path '{}' given by property {property} does not exist", .path.display())]
    MissingPath {
        property: &'static str,
        path: PathBuf,
    },
}

/// Failure reported by a byte source while filling a download target.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("GET {url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("transfer from {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
