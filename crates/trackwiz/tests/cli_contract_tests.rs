//! CLI command contract tests.
//!
//! Runs the `tw` binary against a temp workspace. Sessions go through the
//! built-in demo service (`--dry-run`) so no tracking server is needed.
//!
//! Contract guarantees tested:
//! - Deterministic exit codes
//! - Stable JSON schema in `--format json` mode
//! - Actionable error messages for failure paths

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Test fixture helpers
// =============================================================================

/// Temp workspace holding a config file and a small video.
/// Returns (TempDir guard, config path string).
fn setup_workspace() -> (TempDir, String) {
    let dir = TempDir::new().expect("create temp dir");
    let config = dir.path().join("trackwiz.toml");
    std::fs::write(
        &config,
        "[general]\nlog_level = \"warn\"\n\n[polling]\ninterval_ms = 50\nmax_interval_ms = 50\nmax_attempts = 20\n",
    )
    .expect("write config");
    std::fs::write(dir.path().join("clip.mp4"), b"not really a video").expect("write video");
    let config = config.to_string_lossy().to_string();
    (dir, config)
}

fn tw_cmd_for(dir: &TempDir, config: &str) -> Command {
    let mut cmd = Command::cargo_bin("tw").expect("tw binary should be built");
    cmd.current_dir(dir.path());
    cmd.env("TRACKWIZ_CONFIG", config);
    cmd.env_remove("TRACKWIZ_SERVER");
    cmd.env_remove("RUST_LOG");
    cmd
}

// =============================================================================
// Help and config
// =============================================================================

#[test]
fn contract_help_lists_commands() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("status"))
        .stdout(predicate::str::contains("cleanup"));
}

#[test]
fn contract_config_default_is_toml() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["config", "--default"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[polling]"))
        .stdout(predicate::str::contains("interval_ms = 2000"))
        .stdout(predicate::str::contains("base_url = \"http://127.0.0.1:5000\""));
}

#[test]
fn contract_config_applies_file_and_overrides() {
    let (dir, config) = setup_workspace();
    let output = tw_cmd_for(&dir, &config)
        .args(["config", "--format", "json", "--server", "http://tracker.local:8080"])
        .output()
        .expect("tw config should execute");
    assert!(output.status.success());

    let json: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("config --format json should be JSON");
    assert_eq!(json["service"]["base_url"], "http://tracker.local:8080");
    assert_eq!(json["polling"]["interval_ms"], 50);
}

#[test]
fn contract_missing_config_is_actionable() {
    let (dir, _config) = setup_workspace();
    tw_cmd_for(&dir, "/nonexistent/trackwiz.toml")
        .arg("config")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Config file not found"))
        .stderr(predicate::str::contains("--config"));
}

#[test]
fn contract_invalid_server_url_is_rejected() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["config", "--server", "ftp://tracker"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("base_url"));
}

// =============================================================================
// tw run
// =============================================================================

#[test]
fn contract_run_dry_run_completes() {
    let (dir, config) = setup_workspace();
    let output = tw_cmd_for(&dir, &config)
        .args([
            "run", "clip.mp4", "--point", "10,20", "--negative", "5,5", "--model", "small",
            "--output", "results.zip", "--dry-run", "--format", "json",
        ])
        .output()
        .expect("tw run should execute");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(output.status.success(), "tw run --dry-run failed: {stderr}");

    let report: serde_json::Value =
        serde_json::from_slice(&output.stdout).expect("run --format json should be JSON");
    assert_eq!(report["view"]["step"], "completed");
    assert_eq!(report["view"]["session_id"], "demo-session");
    assert_eq!(report["view"]["summary"]["positive"], 1);
    assert_eq!(report["view"]["summary"]["negative"], 1);
    assert_eq!(report["view"]["results"]["model_size"], "small");
    assert_eq!(report["session_kept"], false);

    let archive = dir.path().join("results.zip");
    let bytes = std::fs::read(&archive).expect("results archive written");
    assert_eq!(report["results_bytes"], bytes.len());
}

#[test]
fn contract_run_plain_reports_steps() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["run", "clip.mp4", "--point", "100,200", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Session demo-session"))
        .stdout(predicate::str::contains("1 tracked, 0 excluded"))
        .stderr(predicate::str::contains("[5/5]"));
}

#[test]
fn contract_run_without_points_fails_before_upload() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["run", "clip.mp4", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no points selected"))
        .stderr(predicate::str::contains("--point x,y"));
}

#[test]
fn contract_run_rejects_malformed_point() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["run", "clip.mp4", "--point", "ten,20", "--dry-run"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("invalid point"));
}

#[test]
fn contract_run_missing_video_is_actionable() {
    let (dir, config) = setup_workspace();
    tw_cmd_for(&dir, &config)
        .args(["run", "missing.mp4", "--point", "1,2", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Video file not found"))
        .stderr(predicate::str::contains("panicked").not());
}

#[test]
fn contract_run_rejects_unsupported_format() {
    let (dir, config) = setup_workspace();
    std::fs::write(dir.path().join("clip.gif"), b"gif").expect("write gif");
    tw_cmd_for(&dir, &config)
        .args(["run", "clip.gif", "--point", "1,2", "--dry-run"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("clip.gif"));
}

// =============================================================================
// Single-request commands
// =============================================================================

#[test]
fn contract_status_unreachable_server_fails_cleanly() {
    let (dir, config) = setup_workspace();
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    tw_cmd_for(&dir, &config)
        .args(["status", "abc", "--server", &format!("http://{addr}")])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error:"))
        .stderr(predicate::str::contains("panicked").not());
}
