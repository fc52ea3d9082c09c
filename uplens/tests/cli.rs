//! End-to-end CLI tests
//!
//! Each test points the XDG directories at a fresh temp dir so nothing
//! touches the real user environment.

use assert_cmd::Command;
use tempfile::TempDir;

fn uplens(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("uplens").unwrap();
    cmd.env("XDG_DATA_HOME", home.path().join("data"))
        .env("XDG_STATE_HOME", home.path().join("state"))
        .env("XDG_CONFIG_HOME", home.path().join("config"));
    cmd
}

#[test]
fn test_status_on_fresh_database() {
    let home = TempDir::new().unwrap();
    uplens(&home)
        .arg("status")
        .assert()
        .success()
        .stdout(predicates::str::contains("Detail records:     0"));
}

#[test]
fn test_ingest_then_summary() {
    let home = TempDir::new().unwrap();
    let export = home.path().join("export.ndjson");
    std::fs::write(
        &export,
        r#"{"user_id": 1, "day": "2024-01-01", "code_generation_activity_count": 10, "code_acceptance_activity_count": 4}
{"user_id": 2, "day": "2024-01-01", "code_generation_activity_count": 5}
{broken line"#,
    )
    .unwrap();

    uplens(&home)
        .args(["ingest", "--keep"])
        .arg(&export)
        .assert()
        .success()
        .stdout(predicates::str::contains("Accepted: 2"))
        .stdout(predicates::str::contains("Rejected: 1"));

    // The file was kept in place
    assert!(export.exists());

    uplens(&home)
        .args(["summary", "--days", "36500", "--json"])
        .assert()
        .success()
        .stdout(predicates::str::contains("\"source\": \"store\""));
}

#[test]
fn test_clear_requires_confirmation() {
    let home = TempDir::new().unwrap();
    uplens(&home).arg("clear").assert().failure();
    uplens(&home).args(["clear", "--yes"]).assert().success();
}
