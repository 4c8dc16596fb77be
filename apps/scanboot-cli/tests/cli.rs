use httpmock::prelude::*;
use predicates::prelude::*;
use tempfile::tempdir;

const SCANNER_ENV: &[&str] = &[
    "SCANBOOT_CONFIG",
    "SONAR_SCANNER_JSON_PARAMS",
    "SONAR_HOST_URL",
    "SONAR_TOKEN",
    "SONAR_REGION",
    "SONAR_USER_HOME",
    "SONAR_SCANNER_JAVA_OPTS",
    "RUST_LOG",
];

fn bin() -> assert_cmd::Command {
    let mut cmd = assert_cmd::Command::cargo_bin("scanboot").expect("binary");
    for var in SCANNER_ENV {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn endpoint_defaults_to_global_cloud() {
    bin()
        .arg("endpoint")
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""webEndpoint":"https://sonarcloud.io""#))
        .stdout(predicate::str::contains(r#""apiEndpoint":"https://api.sonarcloud.io""#))
        .stdout(predicate::str::contains(r#""isCloud":true"#));
}

#[test]
fn endpoint_for_self_hosted_server() {
    bin()
        .args(["endpoint", "-Dsonar.host.url=https://sq.example.com/"])
        .assert()
        .success()
        .stdout(predicate::str::contains(
            r#""apiEndpoint":"https://sq.example.com/api/v2""#,
        ))
        .stdout(predicate::str::contains(r#""isCloud":false"#));
}

#[test]
fn define_overrides_environment() {
    bin()
        .env("SONAR_REGION", "us")
        .env("SONAR_HOST_URL", "https://env.example.com")
        .args(["endpoint", "-Dsonar.host.url=https://sonarqube.us"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""regionLabel":"us""#));
}

#[test]
fn conflicting_region_and_host_fail() {
    bin()
        .args([
            "endpoint",
            "-Dsonar.region=us",
            "-Dsonar.host.url=https://x.example.com",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains(
            "Inconsistent values for properties sonar.region and sonar.host.url",
        ));
}

#[test]
fn config_file_supplies_properties() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scanboot.toml");
    std::fs::write(
        &path,
        "[properties]\n\"sonar.region\" = \"us\"\n\n[http]\nconnect_timeout_secs = 2\n",
    )
    .expect("write config");

    bin()
        .env("SCANBOOT_CONFIG", &path)
        .arg("endpoint")
        .assert()
        .success()
        .stdout(predicate::str::contains("https://api.sonarqube.us"));
}

#[test]
fn invalid_config_file_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("scanboot.toml");
    std::fs::write(&path, "[proxy]\nhost = \"x\"\n").expect("write config");

    bin()
        .arg("--config")
        .arg(&path)
        .arg("endpoint")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid config"));
}

#[test]
fn run_rejects_servers_without_provisioning_support() {
    let server = MockServer::start();
    let version = server.mock(|when, then| {
        when.method(GET).path("/api/server/version");
        then.status(200).body("9.9.8");
    });
    let home = tempdir().expect("tempdir");

    bin()
        .arg(format!("-Dsonar.host.url={}", server.base_url()))
        .arg(format!("-Dsonar.userHome={}", home.path().display()))
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("minimum 10.6.0"));
    version.assert();
}
