//! Common test utilities and fixtures
//!
//! Shared helpers for the integration tests

#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use tempfile::TempDir;

/// Get the path to the test fixtures directory
pub fn fixtures_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
}

/// Get a path to a specific fixture file
pub fn fixture_path(name: &str) -> PathBuf {
    fixtures_dir().join(name)
}

pub fn valid_config_fixture() -> PathBuf {
    fixture_path("valid_config.toml")
}

pub fn invalid_config_fixture() -> PathBuf {
    fixture_path("invalid_config.toml")
}

/// A small corpus with a crosswalk cycle
pub fn cyclic_corpus_fixture() -> PathBuf {
    fixture_path("cyclic_corpus.json")
}

/// The regnav binary with a clean environment for config discovery
pub fn regnav_cmd() -> Command {
    let mut cmd = Command::cargo_bin("regnav").unwrap();
    cmd.env_remove("REGNAV_CONFIG")
        .env_remove("REGNAV_BACKEND")
        .env_remove("REGNAV_CORPUS")
        .env_remove("RUST_LOG");
    cmd
}

/// A config file in its own temporary directory
pub struct ConfigFixture {
    _temp_dir: TempDir,
    config_path: PathBuf,
}

impl ConfigFixture {
    pub fn new(content: &str) -> Self {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("regnav.toml");
        fs::write(&config_path, content).unwrap();
        Self {
            _temp_dir: temp_dir,
            config_path,
        }
    }

    pub fn path(&self) -> &str {
        self.config_path.to_str().unwrap()
    }
}
