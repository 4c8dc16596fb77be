//! JRE and engine provisioning on top of `scanboot-core`, plus the launcher
//! that ties a provisioned runtime and engine together.

pub mod artifact;
pub mod engine;
mod error;
pub mod jre;
pub mod launcher;
pub mod metadata;
pub mod platform;

pub use artifact::{provision_artifact, ProvisionedArtifact, ResolvedArtifact};
pub use engine::{EngineArtifact, EngineProvisioner};
pub use error::ProvisionError;
pub use jre::{local_java_runtime, JavaRuntime, JreProvisioner, RuntimeSource};
pub use launcher::{
    check_server_version, EngineError, ProvisionedScanner, ScannerEngineLauncher,
    MINIMUM_SERVER_VERSION,
};
pub use metadata::{
    ArtifactDownloader, ArtifactMetadata, ArtifactSource, EngineMetadata, JreMetadata,
    MetadataClient, MetadataError,
};
pub use platform::{detect_platform, Platform};
