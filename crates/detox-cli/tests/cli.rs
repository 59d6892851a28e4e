// crates/detox-cli/tests/cli.rs
// ============================================================================
// Module: CLI Workflow Tests
// Description: Run the `detox` binary against a temporary store.
// Purpose: Validate config, import, cache, latest, and dump end to end.
// ============================================================================

//! ## Overview
//! Each test writes a config pointing at a temporary database, then drives the
//! compiled binary and checks exit status and output.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::missing_docs_in_private_items,
    reason = "Test-only assertions and helpers are permitted."
)]

use std::fs;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Output;

use tempfile::TempDir;

// ============================================================================
// SECTION: Helpers
// ============================================================================

const FACTS: &str = r#"{
  "partitions": [{"id": 10, "name": "Physics"}, {"id": 2, "name": "AnalysisOps"}],
  "cycles": [
    {"id": 1, "partition_id": 10, "time_start": 1600000000, "time_end": 1600003600},
    {"id": 2, "partition_id": 10, "time_start": 1600007200, "time_end": 1600010800},
    {"id": 3, "partition_id": 10, "time_start": 1600014400},
    {"id": 4, "partition_id": 2, "time_start": 1600014400, "time_end": 1600018000}
  ],
  "sizes": [
    {"run_id": 1, "partition_id": 10, "site": "T1_A", "dataset": "/a/b/AOD", "size": 1500000000},
    {"run_id": 1, "partition_id": 10, "site": "T2_B", "dataset": "/c/d/AOD", "size": 2000000000}
  ],
  "decisions": [
    {"run_id": 1, "partition_id": 10, "site": "T1_A", "dataset": "/a/b/AOD", "decision": "delete"},
    {"run_id": 2, "partition_id": 10, "site": "T2_B", "dataset": "/c/d/AOD", "decision": "keep"}
  ]
}"#;

fn detox(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_detox"))
        .args(args)
        .env_remove("DETOX_CONFIG")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
    String::from_utf8(output.stderr.clone()).unwrap()
}

fn write_config(dir: &TempDir) -> PathBuf {
    let store = dir.path().join("detox.sqlite");
    let config = dir.path().join("detox.toml");
    fs::write(&config, format!("[store]\npath = '{}'\n", store.display())).unwrap();
    config
}

fn import(config: &Path, dir: &TempDir) {
    let facts = dir.path().join("facts.json");
    fs::write(&facts, FACTS).unwrap();
    let output = detox(&["import", "--config", path(config), path(&facts)]);
    assert!(output.status.success(), "import failed: {}", stderr(&output));
}

fn path(path: &Path) -> &str {
    path.to_str().unwrap()
}

// ============================================================================
// SECTION: Tests
// ============================================================================

#[test]
fn config_example_validates() {
    let dir = TempDir::new().unwrap();
    let example = detox(&["config", "example"]);
    assert!(example.status.success());
    let config = dir.path().join("example.toml");
    fs::write(&config, stdout(&example)).unwrap();
    let output = detox(&["config", "validate", "--config", path(&config)]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "config ok");
}

#[test]
fn config_validate_reports_errors() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("bad.toml");
    fs::write(&config, "[server]\nbind = \"0.0.0.0:80\"\n").unwrap();
    let output = detox(&["config", "validate", "--config", path(&config)]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("non-loopback bind disallowed"));
}

#[test]
fn import_then_latest_skips_running_cycle() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    import(&config, &dir);
    let output = detox(&["latest", "--config", path(&config)]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "2");
    let output = detox(&["latest", "--config", path(&config), "--partition", "AnalysisOps"]);
    assert_eq!(stdout(&output).trim(), "4");
    let output = detox(&["latest", "--config", path(&config), "--cycle", "1"]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output).trim(), "2");
}

#[test]
fn cache_ensure_builds_once() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    import(&config, &dir);
    let first = detox(&["cache", "ensure", "--config", path(&config), "--cycle", "2"]);
    assert!(first.status.success(), "{}", stderr(&first));
    assert_eq!(stdout(&first).trim(), "cycle 2: built, 2 rows cached, 2 inserted");
    let second = detox(&["cache", "ensure", "--config", path(&config), "--cycle", "2"]);
    assert_eq!(stdout(&second).trim(), "cycle 2: already cached, 2 rows cached, 0 inserted");
}

#[test]
fn cache_ensure_rejects_running_and_unknown_cycles() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    import(&config, &dir);
    let running = detox(&["cache", "ensure", "--config", path(&config), "--cycle", "3"]);
    assert!(!running.status.success());
    assert!(stderr(&running).contains("still running"));
    let unknown = detox(&["cache", "ensure", "--config", path(&config), "--cycle", "99"]);
    assert!(!unknown.status.success());
    assert!(stderr(&unknown).contains("not found"));
}

#[test]
fn dump_writes_deletions_of_latest_cycle() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    import(&config, &dir);
    let output = detox(&["dump", "--config", path(&config)]);
    assert!(output.status.success(), "{}", stderr(&output));
    assert_eq!(stdout(&output), "T1_A\t/a/b/AOD\t1.50\n");

    let target = dir.path().join("deletions.tsv");
    let output = detox(&["dump", "--config", path(&config), "--output", path(&target)]);
    assert!(output.status.success());
    assert_eq!(fs::read_to_string(&target).unwrap(), "T1_A\t/a/b/AOD\t1.50\n");
}

#[test]
fn import_rejects_malformed_batch() {
    let dir = TempDir::new().unwrap();
    let config = write_config(&dir);
    let facts = dir.path().join("facts.json");
    fs::write(&facts, "{\"cycles\": 5}").unwrap();
    let output = detox(&["import", "--config", path(&config), path(&facts)]);
    assert!(!output.status.success());
    assert!(stderr(&output).contains("invalid fact batch"));
}
