//! Configuration system for regnav
//!
//! Supports multiple configuration sources with the following precedence (highest to lowest):
//! 1. CLI arguments
//! 2. Environment variables (REGNAV_* prefix)
//! 3. Configuration file (TOML)
//! 4. Default values
//!
//! Personas and the workflow transition table are configuration too, so a
//! deployment can retune the panel or the retry paths without a rebuild.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::analysis::{BackendKind, OpenAiConfig};
use crate::compliance::ComplianceSettings;
use crate::error::{Error, Result};
use crate::persona::{ConsensusSettings, PersonaKind, PersonaProfile, PersonaRegistry};
use crate::space::{CoordinateTables, DEFAULT_TRAVERSAL_DEPTH};
use crate::workflow::{MachineSettings, StageSettings, TransitionRule, TransitionTable};

/// File names searched in the working directory.
const LOCAL_CONFIG_NAMES: [&str; 2] = ["regnav.toml", "config.toml"];

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegnavConfig {
    /// Workflow engine limits
    pub engine: EngineSettings,

    /// Persona selection and consensus thresholds
    pub consensus: ConsensusConfig,

    /// Entity compliance settings
    pub compliance: ComplianceConfig,

    /// Storage of the regulatory corpus
    pub storage: StorageSettings,

    /// Analysis backend selection
    pub backend: BackendSettings,

    /// OpenAI-compatible API backend settings
    pub openai: OpenAiConfig,

    /// Logging configuration
    pub logging: LoggingSettings,

    /// Metadata -> coordinate lookup tables
    pub coordinates: CoordinateTables,

    /// state name -> { success, failure }
    pub transitions: BTreeMap<String, TransitionRule>,

    /// The persona panel, in registry order
    pub personas: Vec<PersonaProfile>,
}

/// Workflow engine settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Failures a single state may absorb before the query fails
    pub max_retries: u32,

    /// Wall-clock budget per query in seconds
    pub timeout_secs: u64,

    /// Crosswalk hops explored from the primary regulation
    pub traversal_depth: usize,

    /// Maximum retrieval candidates per query
    pub nearest_k: usize,

    /// Radius of the coarse retrieval scan
    pub contextual_radius: f64,

    /// Tokio worker threads (0 = auto)
    pub worker_threads: usize,
}

/// Persona consensus settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Personas scoring at or below this are not consulted
    pub relevance_threshold: f64,

    /// Panel size at which persona diversity saturates
    pub ideal_panel_size: usize,

    /// Minimum agreement between the primary and independent analysis
    pub consensus_threshold: f64,

    /// Budget for a single persona's analysis in seconds
    pub persona_timeout_secs: u64,
}

/// Entity compliance settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Items within this distance of an entity apply to it
    pub compliance_radius: f64,
}

/// Corpus storage settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    /// JSON corpus file (unset = bundled sample corpus)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub corpus_path: Option<String>,
}

/// Analysis backend selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub kind: BackendKind,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Log level: trace, debug, info, warn, error
    pub level: String,

    /// Log file path (empty = no file logging)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Log file rotation: daily, hourly, never
    pub rotation: String,

    /// Number of rotated log files to keep
    pub max_files: u32,

    /// Enable JSON formatted logging
    pub json_format: bool,
}

// Default implementations

impl Default for RegnavConfig {
    fn default() -> Self {
        Self {
            engine: EngineSettings::default(),
            consensus: ConsensusConfig::default(),
            compliance: ComplianceConfig::default(),
            storage: StorageSettings::default(),
            backend: BackendSettings::default(),
            openai: OpenAiConfig::default(),
            logging: LoggingSettings::default(),
            coordinates: CoordinateTables::default(),
            transitions: TransitionTable::default().to_rules(),
            personas: default_personas(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout_secs: 30,
            traversal_depth: DEFAULT_TRAVERSAL_DEPTH,
            nearest_k: 10,
            contextual_radius: 2.0,
            worker_threads: 0, // Auto-detect
        }
    }
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.3,
            ideal_panel_size: 3,
            consensus_threshold: 0.8,
            persona_timeout_secs: 20,
        }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            compliance_radius: 1.0,
        }
    }
}

impl Default for BackendSettings {
    fn default() -> Self {
        Self {
            kind: BackendKind::Mock,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            file: None,
            rotation: "daily".to_string(),
            max_files: 5,
            json_format: false,
        }
    }
}

/// The stock legal / financial / compliance panel.
pub fn default_personas() -> Vec<PersonaProfile> {
    let mut legal = PersonaProfile::new(
        "legal",
        PersonaKind::Legal,
        &["regulatory", "compliance", "legal", "statute", "liability"],
        0.75,
        0.4,
    );
    legal.domain = "regulatory law".to_string();
    legal.decision_rules = vec!["Cite the governing provision".to_string()];

    let mut financial = PersonaProfile::new(
        "financial",
        PersonaKind::Financial,
        &["financial", "risk", "capital", "reporting", "market"],
        0.8,
        0.3,
    );
    financial.domain = "financial regulation".to_string();

    let mut compliance = PersonaProfile::new(
        "compliance",
        PersonaKind::Compliance,
        &["compliance", "audit", "controls", "risk", "policy"],
        0.85,
        0.3,
    );
    compliance.domain = "compliance operations".to_string();
    compliance.certifications = vec!["CCEP".to_string()];

    vec![legal, financial, compliance]
}

fn env_flag(val: &str) -> bool {
    val.to_lowercase() == "true" || val == "1"
}

impl RegnavConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Self::default();

        // 1. Load from config file if it exists
        if let Some(path) = Self::find_config_file(config_path)? {
            debug!(path = %path.display(), "Loading configuration file");
            config = Self::from_file(&path)?;
            info!(path = %path.display(), "Configuration loaded from file");
        }

        // 2. Apply environment variable overrides
        config.apply_env_overrides();

        // 3. Expand paths
        config.expand_paths();

        // 4. Validate
        config.validate()?;

        Ok(config)
    }

    /// Parse one TOML file without overrides or validation
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IoRead {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| Error::ConfigParse {
            message: format!("{}: {}", path.display(), e.message()),
            source: Some(e),
        })
    }

    /// Find the configuration file to use
    fn find_config_file(explicit_path: Option<&str>) -> Result<Option<PathBuf>> {
        // If explicit path provided, use it (error if not found)
        if let Some(path) = explicit_path {
            let path = PathBuf::from(expand_path(path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path, source: None });
        }

        if let Ok(path) = std::env::var("REGNAV_CONFIG") {
            let path = PathBuf::from(expand_path(&path));
            if path.exists() {
                return Ok(Some(path));
            }
            return Err(Error::ConfigNotFound { path, source: None });
        }

        // Search in standard locations
        let mut search_paths: Vec<PathBuf> = LOCAL_CONFIG_NAMES.iter().map(PathBuf::from).collect();
        search_paths.extend(dirs::config_dir().map(|p| p.join("regnav").join("config.toml")));
        search_paths.extend(dirs::home_dir().map(|p| p.join(".regnav").join("config.toml")));
        search_paths.push(PathBuf::from("/etc/regnav/config.toml"));

        for path in search_paths {
            if path.exists() {
                debug!(path = %path.display(), "Found configuration file");
                return Ok(Some(path));
            }
        }

        debug!("No configuration file found, using defaults");
        Ok(None)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `REGNAV_*` overrides from `lookup`; unparsable values are ignored
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        // Engine settings
        if let Some(val) = lookup("REGNAV_MAX_RETRIES") {
            if let Ok(n) = val.parse() {
                self.engine.max_retries = n;
            }
        }
        if let Some(val) = lookup("REGNAV_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.engine.timeout_secs = n;
            }
        }
        if let Some(val) = lookup("REGNAV_WORKER_THREADS") {
            if let Ok(n) = val.parse() {
                self.engine.worker_threads = n;
            }
        }

        // Consensus settings
        if let Some(val) = lookup("REGNAV_RELEVANCE_THRESHOLD") {
            if let Ok(n) = val.parse() {
                self.consensus.relevance_threshold = n;
            }
        }
        if let Some(val) = lookup("REGNAV_CONSENSUS_THRESHOLD") {
            if let Ok(n) = val.parse() {
                self.consensus.consensus_threshold = n;
            }
        }

        // Compliance settings
        if let Some(val) = lookup("REGNAV_COMPLIANCE_RADIUS") {
            if let Ok(n) = val.parse() {
                self.compliance.compliance_radius = n;
            }
        }

        // Storage settings
        if let Some(val) = lookup("REGNAV_CORPUS") {
            self.storage.corpus_path = Some(val);
        }

        // Backend settings
        if let Some(val) = lookup("REGNAV_BACKEND") {
            if let Ok(kind) = val.parse() {
                self.backend.kind = kind;
            }
        }
        if let Some(val) = lookup("REGNAV_OPENAI_BASE_URL") {
            self.openai.base_url = val;
        }
        if let Some(val) = lookup("REGNAV_OPENAI_API_KEY") {
            self.openai.api_key = val;
        }
        if let Some(val) = lookup("REGNAV_OPENAI_MODEL") {
            self.openai.model = val;
        }
        if let Some(val) = lookup("REGNAV_OPENAI_TIMEOUT_SECS") {
            if let Ok(n) = val.parse() {
                self.openai.timeout_secs = n;
            }
        }

        // Logging settings
        if let Some(val) = lookup("REGNAV_LOG_LEVEL") {
            self.logging.level = val;
        }
        if let Some(val) = lookup("REGNAV_LOG_FILE") {
            self.logging.file = Some(val);
        }
        if let Some(val) = lookup("REGNAV_LOG_JSON") {
            self.logging.json_format = env_flag(&val);
        }
    }

    /// Expand ~ and other path variables
    fn expand_paths(&mut self) {
        if let Some(ref file) = self.logging.file {
            self.logging.file = Some(expand_path(file));
        }
        if let Some(ref corpus) = self.storage.corpus_path {
            self.storage.corpus_path = Some(expand_path(corpus));
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Engine limits
        if self.engine.timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "engine.timeout_secs",
                "engine.timeout_secs must be greater than 0",
            ));
        }
        if self.engine.nearest_k == 0 {
            return Err(Error::config_field_invalid(
                "engine.nearest_k",
                "engine.nearest_k must be greater than 0",
            ));
        }
        if self.engine.traversal_depth == 0 {
            return Err(Error::config_field_invalid(
                "engine.traversal_depth",
                "engine.traversal_depth must be at least 1",
            ));
        }
        if !self.engine.contextual_radius.is_finite() || self.engine.contextual_radius <= 0.0 {
            return Err(Error::config_field_invalid(
                "engine.contextual_radius",
                "engine.contextual_radius must be a positive number",
            ));
        }

        // Consensus thresholds
        let relevance = self.consensus.relevance_threshold;
        if !relevance.is_finite() || !(0.0..=2.0).contains(&relevance) {
            return Err(Error::config_field_invalid(
                "consensus.relevance_threshold",
                "consensus.relevance_threshold must be between 0 and 2",
            ));
        }
        let agreement = self.consensus.consensus_threshold;
        if !agreement.is_finite() || !(0.0..=1.0).contains(&agreement) {
            return Err(Error::config_field_invalid(
                "consensus.consensus_threshold",
                "consensus.consensus_threshold must be between 0 and 1",
            ));
        }
        if self.consensus.ideal_panel_size == 0 {
            return Err(Error::config_field_invalid(
                "consensus.ideal_panel_size",
                "consensus.ideal_panel_size must be at least 1",
            ));
        }
        if self.consensus.persona_timeout_secs == 0 {
            return Err(Error::config_field_invalid(
                "consensus.persona_timeout_secs",
                "consensus.persona_timeout_secs must be greater than 0",
            ));
        }

        if !self.compliance.compliance_radius.is_finite() || self.compliance.compliance_radius < 0.0 {
            return Err(Error::config_field_invalid(
                "compliance.compliance_radius",
                "compliance.compliance_radius must be a non-negative number",
            ));
        }

        // Structural sections
        self.transition_table()?;
        PersonaRegistry::new(self.personas.clone())?;
        self.coordinates.validate()?;

        if self.backend.kind == BackendKind::OpenAi
            && !self.openai.base_url.starts_with("http://")
            && !self.openai.base_url.starts_with("https://")
        {
            return Err(Error::config_field_invalid(
                "openai.base_url",
                "openai.base_url must start with http:// or https://",
            ));
        }

        // Validate log level
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.level",
                format!(
                    "Invalid log level '{}'. Must be one of: {}",
                    self.logging.level,
                    valid_levels.join(", ")
                ),
            ));
        }
        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&self.logging.rotation.to_lowercase().as_str()) {
            return Err(Error::config_field_invalid(
                "logging.rotation",
                format!(
                    "Invalid log rotation '{}'. Must be one of: {}",
                    self.logging.rotation,
                    valid_rotations.join(", ")
                ),
            ));
        }

        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Component Settings
    // ─────────────────────────────────────────────────────────────

    pub fn transition_table(&self) -> Result<TransitionTable> {
        TransitionTable::from_rules(&self.transitions)
    }

    pub fn machine_settings(&self) -> MachineSettings {
        MachineSettings {
            max_retries: self.engine.max_retries,
            timeout: Duration::from_secs(self.engine.timeout_secs),
        }
    }

    pub fn stage_settings(&self) -> StageSettings {
        StageSettings {
            nearest_k: self.engine.nearest_k,
            contextual_radius: self.engine.contextual_radius,
            traversal_depth: self.engine.traversal_depth,
        }
    }

    pub fn consensus_settings(&self) -> ConsensusSettings {
        ConsensusSettings {
            relevance_threshold: self.consensus.relevance_threshold,
            ideal_panel_size: self.consensus.ideal_panel_size,
            persona_timeout: Duration::from_secs(self.consensus.persona_timeout_secs),
        }
    }

    pub fn compliance_settings(&self) -> ComplianceSettings {
        ComplianceSettings {
            compliance_radius: self.compliance.compliance_radius,
            consensus_threshold: self.consensus.consensus_threshold,
        }
    }

    /// Corpus file as a path, if one is configured
    pub fn corpus_path(&self) -> Option<PathBuf> {
        self.storage.corpus_path.as_deref().map(PathBuf::from)
    }

    /// Worker thread count, resolving 0 to the core count (capped at 8)
    pub fn worker_threads(&self) -> usize {
        match self.engine.worker_threads {
            0 => num_cpus::get().clamp(1, 8),
            n => n,
        }
    }
}

/// Expand ~ and environment variables in paths
fn expand_path(path: &str) -> String {
    shellexpand::full(path)
        .unwrap_or_else(|_| std::borrow::Cow::Borrowed(path))
        .into_owned()
}

/// Default location for `config init`
pub fn default_config_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".regnav")
        .join("config.toml")
}

/// Initialize a new configuration file
pub fn init_config(path: Option<&str>, force: bool) -> Result<PathBuf> {
    let config_path = path
        .map(|p| PathBuf::from(expand_path(p)))
        .unwrap_or_else(default_config_path);

    // Check if file exists
    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Configuration file already exists: {}. Use --force to overwrite.",
            config_path.display()
        )));
    }

    // Create parent directories
    if let Some(parent) = config_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::IoWrite {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }

    fs::write(&config_path, generate_default_config()).map_err(|e| Error::IoWrite {
        path: config_path.clone(),
        source: e,
    })?;

    Ok(config_path)
}

/// Generate default configuration content with comments
pub fn generate_default_config() -> String {
    r#"# regnav configuration
#
# Every value below is the built-in default. Environment variables with
# the REGNAV_ prefix override the file; CLI flags override both.

[engine]
# Failures a single workflow state may absorb before the query fails
max_retries = 3

# Wall-clock budget per query in seconds
timeout_secs = 30

# Crosswalk hops explored from the primary regulation
traversal_depth = 3

# Maximum retrieval candidates per query
nearest_k = 10

# Radius of the coarse retrieval scan around the query coordinate
contextual_radius = 2.0

# Tokio worker threads (0 = auto-detect)
worker_threads = 0

[consensus]
# Personas scoring at or below this are not consulted
relevance_threshold = 0.3

# Panel size at which persona diversity reaches 1.0
ideal_panel_size = 3

# Minimum agreement between the primary and an independent analysis
consensus_threshold = 0.8

# Budget for a single persona's analysis in seconds
persona_timeout_secs = 20

[compliance]
# Regulations within this distance of an entity apply to it
compliance_radius = 1.0

[storage]
# JSON corpus of regulatory items (comment out to use the bundled sample)
# corpus_path = "~/.regnav/corpus.json"

[backend]
# Analysis backend: mock (offline, deterministic) or openai
kind = "mock"

[openai]
# API base URL (OpenAI, Ollama, vLLM, LM Studio, etc.)
base_url = "http://localhost:11434/v1"

# API key (leave empty for local servers like Ollama)
api_key = ""

# Model identifier
model = "llama3"

# Request timeout in seconds
timeout_secs = 60

# Maximum retries on transient failures
max_retries = 2

temperature = 0.2

[logging]
# Log level: trace, debug, info, warn, error
level = "warn"

# Log file path (comment out to disable file logging)
# file = "~/.regnav/logs/regnav.log"

# Log file rotation: daily, hourly, never
rotation = "daily"

# Number of rotated log files to keep
max_files = 5

# Enable JSON formatted logging
json_format = false

[coordinates]
default_pillar = 3
default_level = 2
default_expertise = 3

[coordinates.pillars]
SAFETY = 1
QUALITY = 2
COMPLIANCE = 3
OPERATIONS = 4
GOVERNANCE = 5

[coordinates.levels]
FOUNDATIONAL = 1
INTERMEDIATE = 2
ADVANCED = 3
EXPERT = 4

[coordinates.expertise]
ENTRY = 1
INTERMEDIATE = 2
ADVANCED = 3
EXPERT = 4
SPECIALIST = 5

# Workflow transitions. Every state except `complete` needs a rule; a
# failure target may point back to an earlier state to retry it.
[transitions.query_parsing]
success = "contextualization"
failure = "response_generation"

[transitions.contextualization]
success = "data_retrieval"
failure = "query_parsing"

[transitions.data_retrieval]
success = "gap_analysis"
failure = "contextualization"

[transitions.gap_analysis]
success = "expert_reasoning"
failure = "data_retrieval"

[transitions.expert_reasoning]
success = "compliance_check"
failure = "gap_analysis"

[transitions.compliance_check]
success = "response_generation"
failure = "expert_reasoning"

[transitions.response_generation]
success = "complete"
failure = "expert_reasoning"

# The persona panel. Weights are normalized per query among the
# personas whose relevance score clears the threshold.
[[personas]]
id = "legal"
kind = "legal"
name = "Legal Expert"
domain = "regulatory law"
expertise = ["regulatory", "compliance", "legal", "statute", "liability"]
confidence_threshold = 0.75
consensus_weight = 0.4
decision_rules = ["Cite the governing provision"]

[[personas]]
id = "financial"
kind = "financial"
name = "Financial Analyst"
domain = "financial regulation"
expertise = ["financial", "risk", "capital", "reporting", "market"]
confidence_threshold = 0.8
consensus_weight = 0.3

[[personas]]
id = "compliance"
kind = "compliance"
name = "Compliance Officer"
domain = "compliance operations"
expertise = ["compliance", "audit", "controls", "risk", "policy"]
confidence_threshold = 0.85
consensus_weight = 0.3
certifications = ["CCEP"]
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RegnavConfig::default();
        assert_eq!(config.engine.max_retries, 3);
        assert_eq!(config.engine.timeout_secs, 30);
        assert_eq!(config.consensus.relevance_threshold, 0.3);
        assert_eq!(config.personas.len(), 3);
        assert_eq!(config.transitions.len(), 7);
        assert_eq!(config.backend.kind, BackendKind::Mock);
    }

    #[test]
    fn test_template_matches_defaults() {
        let parsed: RegnavConfig = toml::from_str(&generate_default_config()).unwrap();
        let defaults = RegnavConfig::default();
        assert_eq!(parsed.engine, defaults.engine);
        assert_eq!(parsed.consensus, defaults.consensus);
        assert_eq!(parsed.coordinates, defaults.coordinates);
        assert_eq!(parsed.transitions, defaults.transitions);
        assert_eq!(parsed.personas, defaults.personas);
        assert_eq!(parsed.logging, defaults.logging);
        assert!(parsed.validate().is_ok());
    }

    #[test]
    fn test_env_override() {
        let vars = BTreeMap::from([
            ("REGNAV_MAX_RETRIES", "5"),
            ("REGNAV_CONSENSUS_THRESHOLD", "0.65"),
            ("REGNAV_BACKEND", "openai"),
            ("REGNAV_TIMEOUT_SECS", "soon"),
        ]);

        let mut config = RegnavConfig::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));

        assert_eq!(config.engine.max_retries, 5);
        assert_eq!(config.consensus.consensus_threshold, 0.65);
        assert_eq!(config.backend.kind, BackendKind::OpenAi);
        assert_eq!(config.engine.timeout_secs, EngineSettings::default().timeout_secs);
    }

    #[test]
    fn test_validation_valid_config() {
        assert!(RegnavConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = RegnavConfig::default();
        config.engine.timeout_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RegnavConfig::default();
        config.consensus.consensus_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = RegnavConfig::default();
        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        let mut config = RegnavConfig::default();
        config.personas.clear();
        assert!(config.validate().is_err());

        let mut config = RegnavConfig::default();
        config.transitions.remove("data_retrieval");
        assert!(config.validate().is_err());

        let mut config = RegnavConfig::default();
        config.backend.kind = BackendKind::OpenAi;
        config.openai.base_url = "localhost:11434".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_path_expansion() {
        let mut config = RegnavConfig::default();
        config.storage.corpus_path = Some("~/corpus.json".to_string());
        config.expand_paths();

        // Should not contain ~
        assert!(!config.storage.corpus_path.unwrap().contains('~'));
    }

    #[test]
    fn test_serialize_deserialize() {
        let config = RegnavConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: RegnavConfig = toml::from_str(&toml_str).unwrap();

        assert_eq!(config.engine, parsed.engine);
        assert_eq!(config.personas, parsed.personas);
        assert_eq!(config.transitions, parsed.transitions);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: RegnavConfig = toml::from_str(
            r#"
[engine]
max_retries = 1

[logging]
level = "debug"
"#,
        )
        .unwrap();

        assert_eq!(config.engine.max_retries, 1);
        assert_eq!(config.engine.timeout_secs, 30);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.personas.len(), 3);
    }

    #[test]
    fn test_component_settings() {
        let config = RegnavConfig::default();
        assert_eq!(config.machine_settings().timeout, Duration::from_secs(30));
        assert_eq!(config.stage_settings().nearest_k, 10);
        assert_eq!(config.consensus_settings().persona_timeout, Duration::from_secs(20));
        assert_eq!(config.compliance_settings().consensus_threshold, 0.8);
        assert!(config.worker_threads() >= 1);
        assert_eq!(config.transition_table().unwrap(), TransitionTable::default());
    }
}
