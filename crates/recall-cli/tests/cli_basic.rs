//! Basic CLI E2E tests.
//!
//! Tests invoke CLI commands via cargo run against a throwaway database and
//! config file, and verify outputs.

use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

/// Run a CLI command against the files in `dir` and return output.
fn run_cli(dir: &Path, args: &[&str]) -> (String, String, i32) {
    let db = dir.join("recall.db");
    let config = dir.join("config.toml");
    let output = Command::new("cargo")
        .args(["run", "-q", "-p", "recall-cli", "--"])
        .arg("--db")
        .arg(&db)
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()
        .expect("Failed to execute CLI command");

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();
    let code = output.status.code().unwrap_or(-1);

    (stdout, stderr, code)
}

fn run_ok(dir: &Path, args: &[&str]) -> String {
    let (stdout, stderr, code) = run_cli(dir, args);
    assert_eq!(code, 0, "command {args:?} failed: {stderr}");
    stdout
}

fn created_id(stdout: &str) -> String {
    stdout
        .lines()
        .find_map(|l| l.split(": ").nth(1))
        .expect("no id in output")
        .trim()
        .to_string()
}

#[test]
fn test_container_and_card_lifecycle() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["container", "add", "Languages", "--id", "lang"]);
    run_ok(dir.path(), &["container", "add", "French", "--id", "fr", "--parent", "lang"]);

    let card = created_id(&run_ok(dir.path(), &["card", "add", "fr"]));
    let shown = run_ok(dir.path(), &["card", "show", &card, "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(parsed["stage"], 0);
    assert_eq!(parsed["state"], "ready");

    run_ok(dir.path(), &["card", "answer", &card, "--correct"]);
    let shown = run_ok(dir.path(), &["card", "show", &card, "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(parsed["stage"], 1);
    assert_eq!(parsed["state"], "waiting_correct");

    let listed = run_ok(dir.path(), &["card", "list", "lang", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&listed).unwrap();
    assert_eq!(parsed.as_array().unwrap().len(), 1);
}

#[test]
fn test_answer_requires_a_verdict() {
    let dir = TempDir::new().unwrap();
    let (_, _, code) = run_cli(dir.path(), &["card", "answer", "some-card"]);
    assert_ne!(code, 0);
}

#[test]
fn test_unknown_card_fails() {
    let dir = TempDir::new().unwrap();
    let (_, stderr, code) = run_cli(dir.path(), &["card", "show", "ghost"]);
    assert_ne!(code, 0);
    assert!(stderr.contains("not found"), "stderr: {stderr}");
}

#[test]
fn test_sync_scope_merges_close_timers() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["container", "add", "Languages", "--id", "lang"]);
    let a = created_id(&run_ok(dir.path(), &["card", "add", "lang"]));
    let b = created_id(&run_ok(dir.path(), &["card", "add", "lang"]));
    run_ok(
        dir.path(),
        &["card", "answer", &a, "--correct", "--next", "2099-01-01T10:00:00Z"],
    );
    run_ok(
        dir.path(),
        &["card", "answer", &b, "--correct", "--next", "2099-01-01T10:30:00Z"],
    );

    // The second answer already synchronized the scope.
    let shown = run_ok(dir.path(), &["card", "show", &b, "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&shown).unwrap();
    assert_eq!(parsed["waiting_until"], "2099-01-01T10:00:00Z");

    let out = run_ok(dir.path(), &["sync", "scope", "lang", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["cards_merged"], 0);
}

#[test]
fn test_sync_sweep_json() {
    let dir = TempDir::new().unwrap();
    run_ok(dir.path(), &["container", "add", "Math", "--id", "math"]);
    let out = run_ok(dir.path(), &["sync", "sweep", "--json"]);
    let parsed: serde_json::Value = serde_json::from_str(&out).unwrap();
    assert_eq!(parsed["scopes"].as_array().unwrap().len(), 1);
    assert_eq!(parsed["cancelled"], false);
}

#[test]
fn test_config_get_set() {
    let dir = TempDir::new().unwrap();
    assert_eq!(run_ok(dir.path(), &["config", "get", "sync.tolerance_minutes"]).trim(), "60");
    run_ok(dir.path(), &["config", "set", "sync.tolerance_minutes", "90"]);
    assert_eq!(run_ok(dir.path(), &["config", "get", "sync.tolerance_minutes"]).trim(), "90");

    let (_, _, code) = run_cli(dir.path(), &["config", "get", "no.such.key"]);
    assert_ne!(code, 0);
}
