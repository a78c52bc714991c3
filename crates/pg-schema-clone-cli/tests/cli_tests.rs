//! CLI integration tests for pg-schema-clone.
//!
//! These tests verify command-line argument parsing, help output,
//! and exit codes for error conditions that need no database.

use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;

/// Get a command for the pg-schema-clone binary.
fn cmd() -> Command {
    Command::cargo_bin("pg-schema-clone").unwrap()
}

// =============================================================================
// Help and Version Tests
// =============================================================================

#[test]
fn test_help_shows_all_commands() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("clone"))
        .stdout(predicate::str::contains("derive-name"))
        .stdout(predicate::str::contains("inspect"))
        .stdout(predicate::str::contains("health-check"));
}

#[test]
fn test_clone_subcommand_help() {
    cmd()
        .args(["clone", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--target"))
        .stdout(predicate::str::contains("--tenant-name"))
        .stdout(predicate::str::contains("--tenant-id"))
        .stdout(predicate::str::contains("--source"));
}

#[test]
fn test_version_flag() {
    cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("pg-schema-clone"));
}

#[test]
fn test_no_subcommand_shows_help() {
    cmd()
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage"));
}

// =============================================================================
// Global Flags Tests
// =============================================================================

#[test]
fn test_global_flag_defaults() {
    cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--config"))
        .stdout(predicate::str::contains("[default: config.yaml]"))
        .stdout(predicate::str::contains("--log-format"))
        .stdout(predicate::str::contains("[default: text]"))
        .stdout(predicate::str::contains("--verbosity"))
        .stdout(predicate::str::contains("[default: info]"))
        .stdout(predicate::str::contains("--output-json"));
}

// =============================================================================
// Argument Validation Tests
// =============================================================================

#[test]
fn test_clone_requires_a_target() {
    cmd()
        .arg("clone")
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--target"));
}

#[test]
fn test_clone_target_conflicts_with_tenant() {
    cmd()
        .args([
            "clone",
            "--target",
            "acme",
            "--tenant-name",
            "Acme",
            "--tenant-id",
            "9F2B",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot be used with"));
}

#[test]
fn test_tenant_name_requires_tenant_id() {
    cmd()
        .args(["clone", "--tenant-name", "Acme"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tenant-id"));
}

// =============================================================================
// derive-name Tests
// =============================================================================

#[test]
fn test_derive_name_prints_schema() {
    cmd()
        .args(["derive-name", "--tenant-name", "Acme", "--tenant-id", "9F2B"])
        .assert()
        .success()
        .stdout("acme_9f2b\n");
}

#[test]
fn test_derive_name_json_output() {
    cmd()
        .args([
            "--output-json",
            "derive-name",
            "--tenant-name",
            "Acme Corp!",
            "--tenant-id",
            "ab-12",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"schema\":\"acmecorp_ab_12\""));
}

#[test]
fn test_derive_name_needs_no_config() {
    cmd()
        .args([
            "--config",
            "/nonexistent/config.yaml",
            "derive-name",
            "--tenant-name",
            "Acme",
            "--tenant-id",
            "1",
        ])
        .assert()
        .success();
}

#[test]
fn test_derive_name_rejects_empty_identifier() {
    cmd()
        .args(["derive-name", "--tenant-name", "Acme", "--tenant-id", "!!!"])
        .assert()
        .failure()
        .code(1);
}

// =============================================================================
// Exit Code Tests
// =============================================================================

#[test]
fn test_missing_config_exits_with_code_7() {
    // Missing file is an IO error (code 7), not config error (code 1)
    cmd()
        .args(["--config", "/nonexistent/config.yaml", "health-check"])
        .assert()
        .failure()
        .code(7);
}

#[test]
fn test_invalid_yaml_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "invalid: yaml: content: [").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_empty_config_exits_with_code_1() {
    let file = tempfile::NamedTempFile::new().unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "inspect"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_missing_required_fields_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: localhost").unwrap();

    cmd()
        .args(["--config", file.path().to_str().unwrap(), "health-check"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_invalid_target_name_exits_with_code_1() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "database:").unwrap();
    writeln!(file, "  host: localhost").unwrap();
    writeln!(file, "  database: app").unwrap();
    writeln!(file, "  user: app").unwrap();

    // Rejected before any connection is attempted.
    cmd()
        .args([
            "--config",
            file.path().to_str().unwrap(),
            "clone",
            "--target",
            "pg_tenant",
        ])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("reserved pg_ prefix"));
}
