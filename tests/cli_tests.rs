//! CLI integration tests
//!
//! Tests the command-line interface using assert_cmd

mod common;

use predicates::prelude::*;

use common::{cyclic_corpus_fixture, regnav_cmd};

// ─────────────────────────────────────────────────────────────────
// Help and Version Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_help_flag() {
    regnav_cmd()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("query"))
        .stdout(predicate::str::contains("map"))
        .stdout(predicate::str::contains("related"))
        .stdout(predicate::str::contains("persona"))
        .stdout(predicate::str::contains("config"));
}

#[test]
fn test_version_command() {
    regnav_cmd()
        .arg("version")
        .assert()
        .success()
        .stdout(predicate::str::contains("regnav"))
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")))
        .stdout(predicate::str::contains("Target"));
}

#[test]
fn test_short_version_flag() {
    regnav_cmd()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("regnav"));
}

// ─────────────────────────────────────────────────────────────────
// Query Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_query_text_output() {
    regnav_cmd()
        .args(["query", "What are the cybersecurity program requirements?"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Confidence:"))
        .stdout(predicate::str::contains("query_parsing"))
        .stdout(predicate::str::contains("response_generation"));
}

#[test]
fn test_query_json_output() {
    let output = regnav_cmd()
        .args([
            "query",
            "What are the cybersecurity program requirements?",
            "--expertise",
            "5",
            "--json",
        ])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let confidence = response["confidence_score"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(response["explanation_tree"]["step"], "Query Processing");
    assert!(response["state_history"].as_array().unwrap().len() >= 7);
    assert!(response["query_id"].is_string());
}

#[test]
fn test_query_with_entity_reports_compliance() {
    let output = regnav_cmd()
        .args([
            "query",
            "Does the cybersecurity program apply to us?",
            "--entity",
            "acme",
            "--entity-at",
            "3.2.10.2",
            "--attr",
            "security_program=established",
            "--attr",
            "status=active",
            "--json",
        ])
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let response: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    assert_eq!(response["compliance"]["entity_id"], "acme");
    let decision = response["compliance"]["decision"].as_str().unwrap();
    assert!(["pass", "fail", "escalate"].contains(&decision));
}

#[test]
fn test_query_empty_is_rejected() {
    regnav_cmd()
        .args(["query", "   "])
        .assert()
        .failure()
        .code(30)
        .stderr(predicate::str::contains("E300"));
}

#[test]
fn test_query_expertise_out_of_range() {
    regnav_cmd()
        .args(["query", "capital rules", "--expertise", "9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("expertise level 9"));
}

#[test]
fn test_query_bad_entity_coordinate() {
    regnav_cmd()
        .args(["query", "q", "--entity", "acme", "--entity-at", "9.9.9.9"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn test_query_unknown_backend() {
    regnav_cmd()
        .args(["query", "q", "--backend", "cuda"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Unknown backend"));
}

// ─────────────────────────────────────────────────────────────────
// Map and Related Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_map_command() {
    regnav_cmd()
        .args([
            "map",
            "--domain",
            "compliance",
            "--complexity",
            "INTERMEDIATE",
            "--section",
            "1",
            "--subsection",
            "5",
            "--expertise",
            "EXPERT",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("(3, 2, 1.5, 4)"))
        .stdout(predicate::str::contains("3.2.15.4"));
}

#[test]
fn test_map_uses_fallbacks() {
    regnav_cmd()
        .args(["map", "--json"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"nuremberg\": \"3.2.0.3\""));
}

#[test]
fn test_related_command() {
    regnav_cmd()
        .args(["related", "reg-cyber-001"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reg-cyber-002 [implements]"))
        .stdout(predicate::str::contains("reg-audit-001 [references]"));
}

#[test]
fn test_related_filtered_by_type() {
    regnav_cmd()
        .args(["related", "reg-cyber-001", "--type", "implements"])
        .assert()
        .success()
        .stdout(predicate::str::contains("reg-cyber-002"))
        .stdout(predicate::str::contains("reg-audit-001").not());
}

#[test]
fn test_related_unknown_item() {
    regnav_cmd()
        .args(["related", "no-such-item"])
        .assert()
        .failure()
        .code(70)
        .stderr(predicate::str::contains("E700"));
}

#[test]
fn test_related_terminates_on_cycle() {
    let output = regnav_cmd()
        .args(["related", "loop-a", "--depth", "10", "--json", "--corpus"])
        .arg(cyclic_corpus_fixture())
        .assert()
        .success();

    let stdout = String::from_utf8(output.get_output().stdout.clone()).unwrap();
    let related: serde_json::Value = serde_json::from_str(&stdout).unwrap();
    let ids: Vec<&str> = related
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap())
        .collect();
    assert_eq!(ids, vec!["loop-b", "loop-c"]);
}

#[test]
fn test_missing_corpus_file() {
    regnav_cmd()
        .args(["related", "reg-cyber-001", "--corpus", "/nonexistent/corpus.json"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

// ─────────────────────────────────────────────────────────────────
// Persona Command Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_persona_list() {
    regnav_cmd()
        .args(["persona", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("legal"))
        .stdout(predicate::str::contains("financial"))
        .stdout(predicate::str::contains("compliance"))
        .stdout(predicate::str::contains("Compliance Officer"));
}

// ─────────────────────────────────────────────────────────────────
// Verbosity Flag Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_verbose_flag() {
    regnav_cmd().arg("-v").arg("version").assert().success();
}

#[test]
fn test_quiet_query() {
    regnav_cmd()
        .args(["--quiet", "map", "--domain", "SAFETY"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Nuremberg"));
}

// ─────────────────────────────────────────────────────────────────
// Error Handling Tests
// ─────────────────────────────────────────────────────────────────

#[test]
fn test_unknown_command() {
    regnav_cmd()
        .arg("unknown-command")
        .assert()
        .failure()
        .stderr(predicate::str::contains("error"));
}

#[test]
fn test_missing_subcommand() {
    regnav_cmd().assert().failure();
}
