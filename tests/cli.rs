//! Command line integration tests

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::fs;
use std::path::PathBuf;
use std::process::Command;
use tempfile::TempDir;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const OVERRIDE_VARS: &[&str] = &[
    "CATALOG_PATH",
    "ENABLE_COLOR",
    "LOG_FORMAT",
    "GEO_ENDPOINT",
    "TEST_MODE",
    "TIMEOUT_SECONDS",
    "LATENCY_CONCURRENCY",
    "SPEED_CONCURRENCY",
];

/// `pst` running in an empty directory with no configuration leaking in
fn pst(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("pst").unwrap();
    cmd.current_dir(dir.path()).arg("--no-color");
    for var in OVERRIDE_VARS {
        cmd.env_remove(var);
    }
    cmd
}

fn write_catalog(dir: &TempDir, content: &str) -> PathBuf {
    let path = dir.path().join("catalog.json");
    fs::write(&path, content).unwrap();
    path
}

#[test]
fn env_help_lists_variables() {
    let dir = TempDir::new().unwrap();
    pst(&dir)
        .arg("env-help")
        .assert()
        .success()
        .stdout(predicate::str::contains("CATALOG_PATH"))
        .stdout(predicate::str::contains("TEST_MODE"))
        .stdout(predicate::str::contains("LATENCY_CONCURRENCY"));
}

#[test]
fn profiles_are_listed() {
    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(
        &dir,
        r#"{
            "profiles": [
                {"id": 1, "name": "nightly"},
                {"id": 2, "name": "quick", "mode": "tcp", "timeout_seconds": 3, "latency_concurrency": 8, "speed_concurrency": 2}
            ],
            "targets": []
        }"#,
    );

    pst(&dir)
        .arg("--catalog")
        .arg(&catalog)
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("nightly"))
        .stdout(predicate::str::contains("quick"))
        .stdout(predicate::str::contains("8/2"));
}

#[test]
fn missing_catalog_is_empty() {
    let dir = TempDir::new().unwrap();
    pst(&dir)
        .arg("--catalog")
        .arg(dir.path().join("absent.json"))
        .arg("profiles")
        .assert()
        .success()
        .stdout(predicate::str::contains("No profiles in catalog"));
}

#[test]
fn malformed_catalog_fails() {
    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(&dir, "{ not json");
    pst(&dir)
        .arg("--catalog")
        .arg(&catalog)
        .arg("profiles")
        .assert()
        .failure();
}

#[test]
fn unknown_profile_is_a_config_error() {
    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(&dir, r#"{"profiles": [], "targets": []}"#);
    pst(&dir)
        .arg("--catalog")
        .arg(&catalog)
        .args(["run", "--profile", "42"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn invalid_arguments_are_rejected() {
    let dir = TempDir::new().unwrap();
    pst(&dir).args(["run", "--profile", "1", "--timeout", "0"]).assert().failure();
    pst(&dir).args(["run", "--profile", "1", "--mode", "udp"]).assert().failure();
    pst(&dir).arg("run").assert().failure();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tcp_run_prints_json_summary() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(
        &dir,
        &format!(
            r#"{{
                "profiles": [{{"id": 1, "name": "mock", "latency_url": "{}/generate_204"}}],
                "targets": [
                    {{"id": 1, "name": "a", "link": "direct://"}},
                    {{"id": 2, "name": "b", "link": "direct://"}}
                ]
            }}"#,
            server.uri()
        ),
    );

    let output = pst(&dir)
        .arg("--catalog")
        .arg(&catalog)
        .args(["run", "--profile", "1", "--mode", "tcp", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let summary: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(summary["mode"], "tcp");
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["success"], 2);
    assert_eq!(summary["fail"], 0);
    assert_eq!(summary["persisted"], true);

    let saved: serde_json::Value = serde_json::from_str(&fs::read_to_string(&catalog).unwrap()).unwrap();
    assert_eq!(saved["results"].as_object().unwrap().len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn table_output_for_a_target_subset() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/generate_204"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let catalog = write_catalog(
        &dir,
        &format!(
            r#"{{
                "profiles": [{{"id": 3, "name": "mock", "mode": "tcp", "latency_url": "{}/generate_204"}}],
                "targets": [
                    {{"id": 1, "name": "alpha", "link": "direct://"}},
                    {{"id": 2, "name": "beta", "link": "direct://"}}
                ]
            }}"#,
            server.uri()
        ),
    );

    pst(&dir)
        .arg("--catalog")
        .arg(&catalog)
        .args(["run", "-p", "3", "-t", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Speed test completed: 1 success, 0 failed, 1 total"))
        .stdout(predicate::str::contains("beta"))
        .stdout(predicate::str::contains("alpha").not());
}
