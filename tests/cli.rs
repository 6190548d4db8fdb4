//! CLI integration tests for the `terrareg` binary.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use predicates::prelude::*;

fn terrareg() -> Command {
    let mut cmd = Command::cargo_bin("terrareg").expect("failed to find binary");
    cmd.env_remove("TERRAREG_CONFIG").env("RUST_LOG", "error");
    cmd
}

#[test]
fn test_check_config_accepts_valid_file() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("terrareg.toml");
    config
        .write_str(&format!(
            "listen_host = \"127.0.0.1\"\nlisten_port = 5123\ndatabase_url = \"sqlite://{}\"\n",
            temp.child("terrareg.db").path().display()
        ))
        .unwrap();

    terrareg()
        .args(["check-config", "--config"])
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:5123"));
}

#[test]
fn test_check_config_rejects_invalid_file() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("terrareg.toml");
    config.write_str("listen_port = \"not a port\"\n").unwrap();

    terrareg()
        .args(["check-config", "--config"])
        .arg(config.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid config file"));
}

#[test]
fn test_check_config_rejects_s3_without_bucket() {
    let temp = TempDir::new().unwrap();
    let config = temp.child("terrareg.toml");
    config.write_str("storage_backend = \"s3\"\n").unwrap();

    terrareg()
        .args(["check-config", "--config"])
        .arg(config.path())
        .assert()
        .code(1)
        .stderr(predicate::str::contains("s3_bucket"));
}

#[test]
fn test_missing_config_file() {
    terrareg()
        .args(["check-config", "--config", "/nonexistent/terrareg.toml"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to read"));
}

#[test]
fn test_serve_with_unusable_database_exits_with_database_code() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.child("not-a-dir");
    blocker.write_str("file").unwrap();
    let config = temp.child("terrareg.toml");
    config
        .write_str(&format!(
            "database_url = \"sqlite://{}\"\nstorage_root = \"{}\"\nlisten_port = 0\n",
            blocker.child("terrareg.db").path().display(),
            temp.child("storage").path().display()
        ))
        .unwrap();

    terrareg()
        .args(["serve", "--config"])
        .arg(config.path())
        .assert()
        .code(2);
}
