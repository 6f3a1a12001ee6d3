// CLI integration tests for workbridge

use std::io::Write;
use std::process::Command;

use serde_json::{Value, json};

fn workbridge() -> Command {
    Command::new(env!("CARGO_BIN_EXE_workbridge"))
}

/// Test that --help flag shows help message with program description
#[test]
fn test_help_flag_shows_help_message() {
    let output = workbridge()
        .arg("--help")
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);

    assert!(output.status.success(), "Help should exit with success");
    assert!(
        stdout.contains("workbridge"),
        "Help should contain program name. Got: {}",
        stdout
    );
    assert!(
        stdout.contains("worker") && stdout.contains("broadcast"),
        "Help should list subcommands. Got: {}",
        stdout
    );
}

/// Test that broadcast prints one successful entry per worker
#[test]
fn test_broadcast_reports_every_worker() {
    let config_home = tempfile::tempdir().unwrap();
    let output = workbridge()
        .env("XDG_CONFIG_HOME", config_home.path())
        .args(["broadcast", "--workers", "2", r#"{"hello":"world"}"#])
        .output()
        .expect("Failed to execute command");

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        output.status.success(),
        "Broadcast should succeed. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Map<String, Value> =
        serde_json::from_str(&stdout).expect("stdout should be a JSON object");
    assert_eq!(report.len(), 2);
    for entry in report.values() {
        assert_eq!(entry, &json!({ "ok": [{ "hello": "world" }] }));
    }
}

/// Test that a worker failure is reported per entry and fails the exit status
#[test]
fn test_broadcast_failure_sets_exit_status() {
    let config_home = tempfile::tempdir().unwrap();
    let output = workbridge()
        .env("XDG_CONFIG_HOME", config_home.path())
        .args(["broadcast", "--workers", "1", r#"{"fail":"no such element"}"#])
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success(), "A failed entry should fail the run");

    let report: serde_json::Map<String, Value> =
        serde_json::from_slice(&output.stdout).expect("stdout should be a JSON object");
    let entry = report.values().next().expect("one entry");
    let message = entry["error"].as_str().expect("error entry");
    assert!(
        message.contains("no such element"),
        "Error should carry the handler message. Got: {}",
        message
    );
}

/// Test that --config selects the worker count from a TOML file
#[test]
fn test_broadcast_reads_config_file() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[pool]\nworkers = 3\nshutdown-timeout-ms = 5000").unwrap();

    let output = workbridge()
        .arg("broadcast")
        .arg("--config")
        .arg(config.path())
        .arg(r#""ping""#)
        .output()
        .expect("Failed to execute command");

    assert!(
        output.status.success(),
        "Broadcast should succeed. stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    let report: serde_json::Map<String, Value> =
        serde_json::from_slice(&output.stdout).expect("stdout should be a JSON object");
    assert_eq!(report.len(), 3);
}

/// Test that an invalid config file is rejected before any worker starts
#[test]
fn test_broadcast_rejects_invalid_config() {
    let mut config = tempfile::NamedTempFile::new().unwrap();
    writeln!(config, "[pool]\nworkers = 0").unwrap();

    let output = workbridge()
        .arg("broadcast")
        .arg("--config")
        .arg(config.path())
        .arg("1")
        .output()
        .expect("Failed to execute command");

    assert!(!output.status.success());
    assert!(output.stdout.is_empty(), "Nothing should be reported");
    assert!(String::from_utf8_lossy(&output.stderr).contains("Error"));
}
