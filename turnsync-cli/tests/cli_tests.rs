//! Integration tests for the turnsync binary.

use std::fs;

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

fn turnsync(dir: &TempDir) -> assert_cmd::Command {
    let mut cmd = cargo_bin_cmd!("turnsync");
    cmd.current_dir(dir.path())
        .env_remove("TURNSYNC_SERVER_URL")
        .env_remove("TURNSYNC_API_TOKEN")
        .env_remove("TURNSYNC_LOG_LEVEL")
        .arg("--preferences")
        .arg(dir.path().join("preferences.toml"))
        .timeout(std::time::Duration::from_secs(10));
    cmd
}

#[test]
fn test_help_lists_commands() {
    let mut cmd = cargo_bin_cmd!("turnsync");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Follow and talk to live agent conversations"))
        .stdout(predicate::str::contains("follow"))
        .stdout(predicate::str::contains("history"))
        .stdout(predicate::str::contains("sessions"));
}

#[test]
fn test_follow_requires_conversation() {
    let mut cmd = cargo_bin_cmd!("turnsync");
    cmd.arg("follow")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--conversation <CONVERSATION>"));
}

#[test]
fn test_completion_generates_script() {
    let mut cmd = cargo_bin_cmd!("turnsync");
    cmd.args(["completion", "--shell", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("turnsync"));
}

#[test]
fn test_completion_rejects_unknown_shell() {
    let mut cmd = cargo_bin_cmd!("turnsync");
    cmd.args(["completion", "--shell", "cmd.exe"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid shell type"));
}

#[test]
fn test_config_init_refuses_to_overwrite() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    turnsync(&dir)
        .args(["config", "init"])
        .assert()
        .success()
        .stdout(predicate::str::contains("generated successfully"));
    let written = fs::read_to_string(dir.path().join("turnsync.yaml"))?;
    assert!(written.contains("server_url"));

    turnsync(&dir)
        .args(["config", "init"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));

    turnsync(&dir)
        .args(["config", "init", "--force", "--format", "toml"])
        .assert()
        .success();
    assert!(dir.path().join("turnsync.toml").exists());
    Ok(())
}

#[test]
fn test_preferences_set_get_unset() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    turnsync(&dir)
        .args(["config", "set", "server.url", "https://prefs.example.com"])
        .assert()
        .success();
    turnsync(&dir)
        .args(["config", "get", "server.url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://prefs.example.com"));
    turnsync(&dir)
        .args(["config", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server.url = https://prefs.example.com"));
    turnsync(&dir)
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://prefs.example.com/"));

    turnsync(&dir)
        .args(["config", "unset", "server.url"])
        .assert()
        .success()
        .stdout(predicate::str::contains("server.url removed"));
    turnsync(&dir)
        .args(["config", "get", "server.url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("server.url is not set"));
    Ok(())
}

#[test]
fn test_preference_keys_need_a_namespace() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    turnsync(&dir)
        .args(["config", "set", "token", "abc"])
        .assert()
        .failure();
    Ok(())
}

#[test]
fn test_config_show_prefers_flags_over_environment() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;

    turnsync(&dir)
        .env("TURNSYNC_SERVER_URL", "https://env.example.com")
        .args(["config", "show", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://env.example.com/"));

    turnsync(&dir)
        .env("TURNSYNC_SERVER_URL", "https://env.example.com")
        .args(["--server", "https://flag.example.com", "config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("https://flag.example.com/"))
        .stdout(predicate::str::contains("env.example.com").not());
    Ok(())
}

#[test]
fn test_send_reports_unreachable_server() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    turnsync(&dir)
        .args(["--server", "http://127.0.0.1:9", "send", "--conversation", "c1", "hello"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to send message"));
    Ok(())
}

#[test]
fn test_send_rejects_blank_message() -> Result<(), Box<dyn std::error::Error>> {
    let dir = TempDir::new()?;
    turnsync(&dir)
        .args(["send", "--conversation", "c1", "   "])
        .assert()
        .failure()
        .stderr(predicate::str::contains("message is empty"));
    Ok(())
}
