use std::path::Path;
use std::process::{Command, Stdio};

use scanboot_core::{keys, Properties};
use serde::Serialize;
use tracing::debug;

/// OS and architecture names as understood by the JRE metadata endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

pub fn detect_platform(props: &Properties) -> Platform {
    Platform {
        os: detect_os(props),
        arch: detect_arch(props),
    }
}

pub fn detect_os(props: &Properties) -> String {
    if let Some(os) = props.get(keys::OS) {
        return os.to_string();
    }
    match std::env::consts::OS {
        "windows" => "windows".into(),
        "macos" => "macos".into(),
        _ if Path::new("/etc/alpine-release").exists() => "alpine".into(),
        _ => "linux".into(),
    }
}

pub fn detect_arch(props: &Properties) -> String {
    detect_arch_with(props, probe_arch)
}

/// Architecture from the override property, else from `probe`, else from the
/// architecture this binary was built for.
pub fn detect_arch_with(props: &Properties, probe: impl FnOnce() -> Option<String>) -> String {
    if let Some(arch) = props.get(keys::ARCH) {
        return arch.to_string();
    }
    match probe().map(|raw| raw.trim().to_string()).filter(|raw| !raw.is_empty()) {
        Some(raw) => normalize_arch(&raw),
        None => {
            let fallback = normalize_arch(std::env::consts::ARCH);
            debug!(
                target: "scanboot::provision",
                arch = %fallback,
                "architecture probe gave no answer; using build target architecture"
            );
            fallback
        }
    }
}

pub fn normalize_arch(raw: &str) -> String {
    let lowered = raw.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "x86_64" | "amd64" | "x64" => "x64".into(),
        "arm64" | "aarch64" => "aarch64".into(),
        _ => lowered,
    }
}

fn probe_arch() -> Option<String> {
    let mut cmd = if cfg!(windows) {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "echo %PROCESSOR_ARCHITECTURE%"]);
        cmd
    } else {
        let mut cmd = Command::new("uname");
        cmd.arg("-m");
        cmd
    };
    let output = cmd
        .stdin(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .map_err(|err| {
            debug!(target: "scanboot::provision", error = %err, "architecture probe failed to start");
        })
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).into_owned())
}
