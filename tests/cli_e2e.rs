//! End-to-end CLI tests for the pawprint binary.

use assert_cmd::Command;
use predicates::prelude::*;

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Harvest, clean, and reorganize"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pawprint"));
}

/// Test that a missing subcommand causes non-zero exit with usage help.
#[test]
fn test_binary_without_subcommand_returns_error() {
    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

/// Test that invalid flags cause non-zero exit.
#[test]
fn test_binary_invalid_flag_returns_error() {
    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.args(["harvest", "--invalid-flag"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

/// Test that out-of-range flag values are rejected by the parser.
#[test]
fn test_binary_rejects_out_of_range_concurrency() {
    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.args(["harvest", "--concurrency", "0"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

/// Test that reorganizing an empty store succeeds and writes a summary.
#[test]
fn test_reorganize_empty_store_exits_zero() {
    let raw = tempfile::TempDir::new().unwrap();
    let dataset = tempfile::TempDir::new().unwrap();

    let mut cmd = Command::cargo_bin("pawprint").unwrap();
    cmd.args(["-q", "-o"])
        .arg(raw.path())
        .arg("reorganize")
        .arg("-d")
        .arg(dataset.path())
        .assert()
        .success();

    let summary: serde_json::Value =
        serde_json::from_slice(&std::fs::read(dataset.path().join("summary.json")).unwrap())
            .unwrap();
    assert_eq!(summary["record_count"], 0);
}
