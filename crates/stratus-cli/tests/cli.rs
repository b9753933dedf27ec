//! Smoke tests for the `stratus` binary.

use assert_cmd::Command;
use predicates::prelude::*;

fn stratus() -> Command {
    let mut cmd = Command::cargo_bin("stratus").unwrap();
    cmd.env_remove("RUST_LOG")
        .env_remove("STRATUS_PRESET")
        .env("NO_COLOR", "1");
    cmd
}

#[test]
fn help_lists_commands() {
    stratus()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("build"))
        .stdout(predicate::str::contains("dev"))
        .stdout(predicate::str::contains("prerender"));
}

#[test]
fn version_flag() {
    stratus()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn quiet_and_verbose_conflict() {
    stratus()
        .args(["--quiet", "--verbose", "build"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn unknown_preset_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    stratus()
        .current_dir(dir.path())
        .args(["build", "--preset", "not-a-preset"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown preset \"not-a-preset\""));
}

#[test]
fn prerender_without_routes_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    stratus()
        .arg("prerender")
        .arg(dir.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("Nothing to prerender"));
    assert!(!dir.path().join(".output").exists());
}

#[test]
fn missing_config_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    stratus()
        .arg("prerender")
        .arg(dir.path())
        .args(["--config", "missing.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}

#[test]
fn dev_rejects_hostnames() {
    stratus()
        .args(["dev", "--host", "localhost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--host localhost is not an IP address"));
}
