//! CLI integration tests for the `stepwise` subcommands.
//!
//! Uses `assert_cmd` to spawn the binary and verify exit codes, stdout
//! and stderr. Hashing runs with the cheapest Argon2 parameters.

use std::path::{Path, PathBuf};

use assert_cmd::cargo::cargo_bin_cmd;
use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

/// Helper: a `stepwise` command with fast hashing and quiet logs.
fn stepwise() -> Command {
    let mut cmd = cargo_bin_cmd!("stepwise");
    cmd.env("STEPWISE_HASH_MEMORY_KIB", "8")
        .env("STEPWISE_HASH_ITERATIONS", "1")
        .env("STEPWISE_LOG", "warn");
    cmd
}

// ──────────────────────────────────────────────
// Help and version
// ──────────────────────────────────────────────

#[test]
fn help_exits_0_with_description() {
    stepwise()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Stepwise process execution engine"));
}

#[test]
fn version_exits_0() {
    stepwise()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("stepwise"));
}

#[test]
fn unknown_subcommand_fails() {
    stepwise().arg("frobnicate").assert().failure();
}

// ──────────────────────────────────────────────
// check
// ──────────────────────────────────────────────

#[test]
fn check_accepts_valid_definitions() {
    stepwise()
        .arg("check")
        .arg(fixture("definitions.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("ok (3 forms, 2 processes)"));
}

#[test]
fn check_json_output() {
    let output = stepwise()
        .args(["--output", "json", "check"])
        .arg(fixture("definitions.json"))
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["valid"], true);
    assert_eq!(json["processes"], 2);
    assert_eq!(json["problems"].as_array().unwrap().len(), 0);
}

#[test]
fn check_reports_problems_and_fails() {
    stepwise()
        .arg("check")
        .arg(fixture("invalid_definitions.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("processes[0]: private process needs a password"))
        .stderr(predicate::str::contains("processes[0].steps[0]: unknown form 'survey'"));
}

#[test]
fn check_json_lists_problems() {
    let output = stepwise()
        .args(["--output", "json", "check"])
        .arg(fixture("invalid_definitions.json"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    let json: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(json["valid"], false);
    let problems = json["problems"].as_array().unwrap();
    assert_eq!(problems.len(), 2);
    assert_eq!(problems[1]["at"], "processes[0].steps[0]");
}

#[test]
fn check_missing_file_fails() {
    stepwise()
        .args(["check", "does/not/exist.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot read"));
}

#[test]
fn check_malformed_json_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, "{ \"forms\": [").unwrap();
    stepwise()
        .arg("check")
        .arg(&path)
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid JSON"));
}

// ──────────────────────────────────────────────
// hash-password
// ──────────────────────────────────────────────

#[test]
fn hash_password_prints_argon2id_phc_string() {
    stepwise()
        .args(["hash-password", "hunter2"])
        .assert()
        .success()
        .stdout(predicate::str::starts_with("$argon2id$v=19$"));
}

#[test]
fn hash_password_salts_every_hash() {
    let first = stepwise().args(["hash-password", "same"]).output().unwrap();
    let second = stepwise().args(["hash-password", "same"]).output().unwrap();
    assert_ne!(first.stdout, second.stdout);
}

#[test]
fn hash_password_rejects_empty() {
    stepwise()
        .args(["hash-password", ""])
        .assert()
        .failure()
        .stderr(predicate::str::contains("must not be empty"));
}

// ──────────────────────────────────────────────
// seed and sweep
// ──────────────────────────────────────────────

#[test]
fn seed_into_file_database() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stepwise.db");

    let output = stepwise()
        .arg("--db")
        .arg(&db)
        .args(["--output", "json", "seed"])
        .arg(fixture("definitions.json"))
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["forms"], 3);
    assert_eq!(report["steps"], 4);
    assert_eq!(report["processes"], serde_json::json!(["onboarding", "partners"]));
    assert!(db.exists());

    // Slugs are taken now, so a second seed fails.
    stepwise()
        .arg("--db")
        .arg(&db)
        .arg("seed")
        .arg(fixture("definitions.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn seed_text_output_lists_slugs() {
    stepwise()
        .arg("seed")
        .arg(fixture("definitions.json"))
        .assert()
        .success()
        .stdout(predicate::str::contains("Seeded 3 forms, 2 processes, 4 steps"))
        .stdout(predicate::str::contains("  onboarding"));
}

#[test]
fn seed_refuses_invalid_definitions() {
    stepwise()
        .arg("seed")
        .arg(fixture("invalid_definitions.json"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("2 problem(s)"));
}

#[test]
fn sweep_on_empty_database_finds_nothing() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("stepwise.db");
    stepwise()
        .arg("--db")
        .arg(&db)
        .args(["sweep", "--idle-minutes", "30"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Scanned 0 idle runs: 0 abandoned"));
}

#[test]
fn sweep_json_report() {
    let output = stepwise()
        .args(["--output", "json", "sweep"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_slice(&output.stdout).expect("valid JSON");
    assert_eq!(report["scanned"], 0);
    assert_eq!(report["abandoned"], serde_json::json!([]));
}

#[test]
fn unopenable_database_fails() {
    let dir = TempDir::new().unwrap();
    stepwise()
        .arg("--db")
        .arg(dir.path().join("missing-dir").join("x.db"))
        .arg("sweep")
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot open"));
}
