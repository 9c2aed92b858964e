//! Configuration system tests
//!
//! Tests configuration loading, validation, and environment overrides
//! through the binary

mod common;

use std::fs;

use predicates::prelude::*;
use tempfile::TempDir;

use common::{invalid_config_fixture, regnav_cmd, valid_config_fixture, ConfigFixture};

// ─────────────────────────────────────────────────────────────────
// Valid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_default_config_is_valid() {
    regnav_cmd()
        .args(["config", "validate"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration is valid"));
}

#[test]
fn test_valid_fixture() {
    regnav_cmd()
        .args(["config", "validate", "--config"])
        .arg(valid_config_fixture())
        .assert()
        .success();
}

#[test]
fn test_full_config() {
    let fixture = ConfigFixture::new(
        r#"
[engine]
max_retries = 1
timeout_secs = 5
traversal_depth = 2
nearest_k = 4
contextual_radius = 1.5
worker_threads = 2

[consensus]
relevance_threshold = 0.2
ideal_panel_size = 2
consensus_threshold = 0.7
persona_timeout_secs = 3

[compliance]
compliance_radius = 0.5

[coordinates]
default_pillar = 4

[[personas]]
id = "counsel"
kind = "legal"
name = "General Counsel"
expertise = ["statute", "liability", "contract"]
confidence_threshold = 0.8
consensus_weight = 0.6

[[personas]]
id = "auditor"
kind = "compliance"
name = "Internal Auditor"
expertise = ["audit", "controls"]
confidence_threshold = 0.7
consensus_weight = 0.4

[logging]
level = "debug"
rotation = "hourly"
max_files = 3
"#,
    );

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .success();
}

// ─────────────────────────────────────────────────────────────────
// Invalid Configuration Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_invalid_fixture() {
    regnav_cmd()
        .args(["config", "validate", "--config"])
        .arg(invalid_config_fixture())
        .assert()
        .failure()
        .code(10)
        .stderr(predicate::str::contains("consensus.consensus_threshold"));
}

#[test]
fn test_nonexistent_file() {
    regnav_cmd()
        .args(["config", "validate", "--config", "/nonexistent/path/regnav.toml"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E100"));
}

#[test]
fn test_invalid_log_level() {
    let fixture = ConfigFixture::new("[logging]\nlevel = \"loud\"\n");

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid log level 'loud'"));
}

#[test]
fn test_duplicate_persona_ids() {
    let fixture = ConfigFixture::new(
        r#"
[[personas]]
id = "legal"
kind = "legal"
name = "Legal Expert"
expertise = ["statute"]
confidence_threshold = 0.75
consensus_weight = 0.5

[[personas]]
id = "legal"
kind = "financial"
name = "Financial Analyst"
expertise = ["capital"]
confidence_threshold = 0.8
consensus_weight = 0.5
"#,
    );

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("legal"));
}

#[test]
fn test_transition_to_unknown_state() {
    let fixture = ConfigFixture::new(
        r#"
[transitions.query_parsing]
success = "daydreaming"
failure = "response_generation"
"#,
    );

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure();
}

#[test]
fn test_partial_transition_table() {
    let fixture = ConfigFixture::new(
        r#"
[transitions.gap_analysis]
success = "expert_reasoning"
failure = "response_generation"
"#,
    );

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing transition rule"));
}

#[test]
fn test_out_of_range_lookup_value() {
    let fixture = ConfigFixture::new("[coordinates.pillars]\nSAFETY = 9\n");

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure();
}

#[test]
fn test_malformed_toml() {
    let fixture = ConfigFixture::new("[engine\nmax_retries = 3\n");

    regnav_cmd()
        .args(["config", "validate", "--config", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("E101"));
}

#[test]
fn test_invalid_config_blocks_query() {
    regnav_cmd()
        .args(["query", "capital rules", "--config"])
        .arg(invalid_config_fixture())
        .assert()
        .failure()
        .code(10);
}

// ─────────────────────────────────────────────────────────────────
// Config Show Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_show_default() {
    regnav_cmd()
        .args(["config", "show"])
        .assert()
        .success()
        .stdout(predicate::str::contains("[engine]"))
        .stdout(predicate::str::contains("[consensus]"))
        .stdout(predicate::str::contains("[compliance]"))
        .stdout(predicate::str::contains("[logging]"))
        .stdout(predicate::str::contains("[[personas]]"));
}

#[test]
fn test_config_show_custom() {
    regnav_cmd()
        .args(["config", "show", "--config"])
        .arg(valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 2"))
        .stdout(predicate::str::contains("nearest_k = 5"))
        .stdout(predicate::str::contains("consensus_threshold = 0.75"));
}

// ─────────────────────────────────────────────────────────────────
// Config Init Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_config_init_creates_file() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("nested").join("regnav.toml");

    regnav_cmd()
        .args(["config", "init", "--path"])
        .arg(&config_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("Wrote default configuration"));

    assert!(config_path.exists());

    regnav_cmd()
        .args(["config", "validate", "--config"])
        .arg(&config_path)
        .assert()
        .success();
}

#[test]
fn test_config_init_refuses_overwrite() {
    let fixture = ConfigFixture::new("[engine]\n");

    regnav_cmd()
        .args(["config", "init", "--path", fixture.path()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));
}

#[test]
fn test_config_init_force_overwrite() {
    let fixture = ConfigFixture::new("[engine]\nmax_retries = 42\n");

    regnav_cmd()
        .args(["config", "init", "--force", "--path", fixture.path()])
        .assert()
        .success();

    let content = fs::read_to_string(fixture.path()).unwrap();
    assert!(!content.contains("42"));
}

// ─────────────────────────────────────────────────────────────────
// Environment Variable Override Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_env_overrides_file() {
    regnav_cmd()
        .args(["config", "show", "--config"])
        .arg(valid_config_fixture())
        .env("REGNAV_MAX_RETRIES", "7")
        .env("REGNAV_COMPLIANCE_RADIUS", "2.5")
        .assert()
        .success()
        .stdout(predicate::str::contains("max_retries = 7"))
        .stdout(predicate::str::contains("compliance_radius = 2.5"));
}

#[test]
fn test_env_config_path() {
    regnav_cmd()
        .args(["config", "show"])
        .env("REGNAV_CONFIG", valid_config_fixture())
        .assert()
        .success()
        .stdout(predicate::str::contains("nearest_k = 5"));
}

#[test]
fn test_env_invalid_value_fails_validation() {
    regnav_cmd()
        .args(["config", "validate"])
        .env("REGNAV_CONSENSUS_THRESHOLD", "3.0")
        .assert()
        .failure();
}

// ─────────────────────────────────────────────────────────────────
// Path Expansion Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_tilde_expansion() {
    let fixture = ConfigFixture::new("[storage]\ncorpus_path = \"~/regnav/corpus.json\"\n");

    let output = regnav_cmd()
        .args(["config", "show", "--config", fixture.path()])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    assert!(stdout.contains("corpus_path"));
    assert!(!stdout.contains("corpus_path = \"~"));
}
