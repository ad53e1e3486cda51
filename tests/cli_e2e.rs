//! End-to-end CLI tests for the magnet-relay binary.

use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

const HEX: &str = "c12fe1c06bba254a9dc9f519b335aa7c1367a88a";

/// Binary isolated from the user's config, writing its database under `dir`.
fn relay(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("magnet-relay").unwrap();
    cmd.env("XDG_CONFIG_HOME", dir.join("config"))
        .env_remove("RUST_LOG")
        .arg("--db")
        .arg(dir.join("relay.db"));
    cmd
}

/// Test that running without a subcommand prints usage and fails.
#[test]
fn test_binary_without_subcommand_shows_usage() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

/// Test that --help displays usage information and exits with code 0.
#[test]
fn test_binary_help_displays_usage() {
    let mut cmd = Command::cargo_bin("magnet-relay").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Maintenance tool"))
        .stdout(predicate::str::contains("quota"));
}

/// Test that --version displays version and exits with code 0.
#[test]
fn test_binary_version_displays_version() {
    let mut cmd = Command::cargo_bin("magnet-relay").unwrap();
    cmd.arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("magnet-relay"));
}

#[test]
fn test_locator_prints_canonical_resource_id() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args([
            "locator",
            "/magnet",
            "magnet:?xt=urn:btih:YEX6DQDLXISUVHOJ6UM3GNNKPQJWPKEK&dn=bundle&tr=udp://t.example:80",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains(format!("resource_id = {HEX}")))
        .stdout(predicate::str::contains("display_name = bundle"))
        .stdout(predicate::str::contains("trackers = 1"));
}

#[test]
fn test_locator_without_magnet_fails_with_suggestion() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["locator", "hello", "world"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no magnet link found"));
}

#[test]
fn test_quota_show_creates_basic_profile() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["quota", "show", "42"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tier = basic"))
        .stdout(predicate::str::contains("concurrent_slots = 1/1"))
        .stdout(predicate::str::contains("daily_quota = 10/10"));
}

#[test]
fn test_set_tier_persists_between_runs() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["quota", "set-tier", "42", "premium"])
        .assert()
        .success()
        .stdout(predicate::str::contains("tier = premium"));

    relay(dir.path())
        .args(["quota", "show", "42", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"tier\": \"premium\""))
        .stdout(predicate::str::contains("\"daily_quota_total\": 100"));
}

#[test]
fn test_set_tier_rejects_unknown_tier() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["quota", "set-tier", "42", "gold"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown tier"));
}

#[test]
fn test_slots_reset_on_fresh_database() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["slots", "reset"])
        .assert()
        .success()
        .stdout(predicate::str::contains("restored = 0"));
}

#[test]
fn test_manifest_show_missing_manifest_fails() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["manifest", "show", HEX])
        .assert()
        .failure()
        .stderr(predicate::str::contains("No cached manifest"));
}

#[test]
fn test_ledger_clear_on_fresh_database() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["ledger", "clear"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed = 0"));
}

#[test]
fn test_config_show_reports_loaded_file() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("relay.toml");
    std::fs::write(&config, "publish_channel = -100123\nclaim_wait_secs = 45\n").unwrap();

    relay(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config_file = loaded"))
        .stdout(predicate::str::contains("publish_channel = -100123"))
        .stdout(predicate::str::contains("claim_wait_secs = 45"));
}

#[test]
fn test_config_show_without_file_uses_defaults() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("config_file = not found"));
}

#[test]
fn test_invalid_config_fails_with_line_number() {
    let dir = TempDir::new().unwrap();
    let config = dir.path().join("relay.toml");
    std::fs::write(&config, "# relay\nnot a setting\n").unwrap();

    relay(dir.path())
        .arg("--config")
        .arg(&config)
        .args(["config", "show"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load configuration"))
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn test_missing_explicit_config_fails() {
    let dir = TempDir::new().unwrap();
    relay(dir.path())
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .args(["config", "show"])
        .assert()
        .failure();
}
