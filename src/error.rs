//! Error types for regnav
//!
//! Provides structured error handling with:
//! - Numeric error codes for machine parsing
//! - A coarse category matching the query-processing error taxonomy
//! - User-friendly messages with suggestions
//! - Exit codes for CLI

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::workflow::{WorkflowSnapshot, WorkflowState};

/// Result type alias for regnav operations
pub type Result<T> = std::result::Result<T, Error>;

/// Numeric error codes for machine parsing and documentation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum ErrorCode {
    // Configuration errors (1xx)
    ConfigNotFound = 100,
    ConfigParseError = 101,
    ConfigValidation = 102,

    // IO errors (2xx)
    IoRead = 200,
    IoWrite = 201,
    IoNotFound = 203,

    // Validation errors (3xx)
    InvalidQuery = 300,
    InvalidCoordinate = 301,
    InvalidMetadata = 302,

    // Persona / analysis backend errors (4xx)
    PersonaFailed = 400,
    PersonaTimeout = 401,
    BackendError = 410,

    // Processing errors (5xx)
    ProcessingFailed = 500,
    AllPersonasFailed = 501,
    RefinementRequired = 502,
    RetriesExhausted = 503,
    WorkflowTimeout = 504,

    // Consensus errors (6xx)
    ZeroConsensusWeight = 600,

    // Store errors (7xx)
    ItemNotFound = 700,
    CorpusLoad = 701,

    // Internal errors (9xx)
    InternalError = 900,
    NotSupported = 901,
}

impl ErrorCode {
    /// Get the string code (e.g., "E100")
    pub fn as_str(&self) -> String {
        format!("E{}", *self as u16)
    }

    /// Get the exit code for CLI (maps to 1-125 range)
    pub fn exit_code(&self) -> i32 {
        match *self as u16 {
            100..=199 => 10, // Config errors
            200..=299 => 20, // IO errors
            300..=399 => 30, // Validation errors
            400..=499 => 40, // Persona errors
            500..=599 => 50, // Processing errors
            600..=699 => 60, // Consensus errors
            700..=799 => 70, // Store errors
            900..=999 => 90, // Internal errors
            _ => 1,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse error taxonomy used by the workflow to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed or incomplete configuration, fatal at startup
    Configuration,
    /// Malformed input, rejected before any state executes
    Validation,
    /// A single persona failed; isolated at the persona boundary
    PersonaFailure,
    /// A named state's logic failed (consensus errors land here too)
    Processing,
    /// File system access
    Io,
    /// Everything else
    Internal,
}

/// Main error type for regnav
#[derive(Error, Debug)]
pub enum Error {
    // ─────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────

    /// Configuration file not found
    #[error("Configuration file not found: {path}")]
    ConfigNotFound {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Configuration parse error
    #[error("Failed to parse configuration: {message}")]
    ConfigParse {
        message: String,
        #[source]
        source: Option<toml::de::Error>,
    },

    /// Configuration validation error
    #[error("Configuration validation failed: {message}")]
    ConfigValidation { message: String, field: Option<String> },

    /// Generic configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    // ─────────────────────────────────────────────────────────────
    // IO Errors
    // ─────────────────────────────────────────────────────────────

    /// File read error
    #[error("Failed to read file: {path}")]
    IoRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// File write error
    #[error("Failed to write file: {path}")]
    IoWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ─────────────────────────────────────────────────────────────
    // Validation Errors
    // ─────────────────────────────────────────────────────────────

    /// Query or user context rejected before processing
    #[error("Invalid query: {message}")]
    InvalidQuery { message: String },

    /// Coordinate outside the 4D space or malformed Nuremberg number
    #[error("Invalid coordinate: {message}")]
    InvalidCoordinate { message: String },

    /// Item metadata cannot be mapped
    #[error("Invalid metadata: {message}")]
    InvalidMetadata { message: String },

    // ─────────────────────────────────────────────────────────────
    // Persona / Backend Errors
    // ─────────────────────────────────────────────────────────────

    /// A single persona's analysis failed
    #[error("Persona {persona} failed: {message}")]
    PersonaFailed { persona: String, message: String },

    /// A single persona's analysis did not settle in time
    #[error("Persona {persona} timed out after {timeout_secs}s")]
    PersonaTimeout { persona: String, timeout_secs: u64 },

    /// The analysis backend returned an error
    #[error("Analysis backend {backend} error: {message}")]
    Backend { backend: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Processing Errors
    // ─────────────────────────────────────────────────────────────

    /// A workflow state's logic failed
    #[error("Processing failed: {message}")]
    Processing { message: String },

    /// Every relevant persona failed for this batch
    #[error("All {attempted} relevant persona analyses failed")]
    AllPersonasFailed { attempted: usize },

    /// Independent verification disagreed with the primary analysis
    #[error("Analysis needs refinement: consensus score {consensus_score:.2} below {threshold:.2}")]
    RefinementRequired { consensus_score: f64, threshold: f64 },

    /// A state kept failing until its retry budget ran out
    #[error("Workflow failed in state {state} after {retries} retries: {message}")]
    WorkflowFailed {
        state: WorkflowState,
        retries: u32,
        message: String,
        snapshot: Option<Box<WorkflowSnapshot>>,
    },

    /// The per-query wall-clock budget ran out
    #[error("Workflow timed out in state {state} after {timeout_secs}s")]
    WorkflowTimeout {
        state: WorkflowState,
        timeout_secs: u64,
        snapshot: Option<Box<WorkflowSnapshot>>,
    },

    // ─────────────────────────────────────────────────────────────
    // Consensus Errors
    // ─────────────────────────────────────────────────────────────

    /// No relevant persona had a positive weight × score
    #[error("Cannot combine persona results: total consensus weight is zero across {personas} personas")]
    ZeroConsensusWeight { personas: usize },

    // ─────────────────────────────────────────────────────────────
    // Store Errors
    // ─────────────────────────────────────────────────────────────

    /// Unknown regulatory item identifier
    #[error("Regulatory item not found: {id}")]
    ItemNotFound { id: String },

    /// Corpus file could not be loaded
    #[error("Failed to load corpus {source_name}: {message}")]
    CorpusLoad { source_name: String, message: String },

    // ─────────────────────────────────────────────────────────────
    // Internal Errors
    // ─────────────────────────────────────────────────────────────

    /// Feature not supported
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    // ─────────────────────────────────────────────────────────────
    // Error Classification
    // ─────────────────────────────────────────────────────────────

    /// Get the numeric error code
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::ConfigNotFound { .. } => ErrorCode::ConfigNotFound,
            Error::ConfigParse { .. } => ErrorCode::ConfigParseError,
            Error::ConfigValidation { .. } => ErrorCode::ConfigValidation,
            Error::Config(_) => ErrorCode::ConfigValidation,
            Error::IoRead { .. } => ErrorCode::IoRead,
            Error::IoWrite { .. } => ErrorCode::IoWrite,
            Error::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => ErrorCode::IoNotFound,
                _ => ErrorCode::IoRead,
            },
            Error::Toml(_) => ErrorCode::ConfigParseError,
            Error::Json(_) => ErrorCode::CorpusLoad,
            Error::InvalidQuery { .. } => ErrorCode::InvalidQuery,
            Error::InvalidCoordinate { .. } => ErrorCode::InvalidCoordinate,
            Error::InvalidMetadata { .. } => ErrorCode::InvalidMetadata,
            Error::PersonaFailed { .. } => ErrorCode::PersonaFailed,
            Error::PersonaTimeout { .. } => ErrorCode::PersonaTimeout,
            Error::Backend { .. } => ErrorCode::BackendError,
            Error::Processing { .. } => ErrorCode::ProcessingFailed,
            Error::AllPersonasFailed { .. } => ErrorCode::AllPersonasFailed,
            Error::RefinementRequired { .. } => ErrorCode::RefinementRequired,
            Error::WorkflowFailed { .. } => ErrorCode::RetriesExhausted,
            Error::WorkflowTimeout { .. } => ErrorCode::WorkflowTimeout,
            Error::ZeroConsensusWeight { .. } => ErrorCode::ZeroConsensusWeight,
            Error::ItemNotFound { .. } => ErrorCode::ItemNotFound,
            Error::CorpusLoad { .. } => ErrorCode::CorpusLoad,
            Error::NotSupported(_) => ErrorCode::NotSupported,
            Error::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Map the error onto the query-processing taxonomy
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::ConfigNotFound { .. }
            | Error::ConfigParse { .. }
            | Error::ConfigValidation { .. }
            | Error::Config(_)
            | Error::Toml(_) => ErrorCategory::Configuration,
            Error::InvalidQuery { .. }
            | Error::InvalidCoordinate { .. }
            | Error::InvalidMetadata { .. } => ErrorCategory::Validation,
            Error::PersonaFailed { .. } | Error::PersonaTimeout { .. } | Error::Backend { .. } => {
                ErrorCategory::PersonaFailure
            }
            Error::Processing { .. }
            | Error::AllPersonasFailed { .. }
            | Error::RefinementRequired { .. }
            | Error::WorkflowFailed { .. }
            | Error::WorkflowTimeout { .. }
            | Error::ZeroConsensusWeight { .. }
            | Error::ItemNotFound { .. } => ErrorCategory::Processing,
            Error::IoRead { .. }
            | Error::IoWrite { .. }
            | Error::Io(_)
            | Error::Json(_)
            | Error::CorpusLoad { .. } => ErrorCategory::Io,
            Error::NotSupported(_) | Error::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Check if the error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::PersonaTimeout { .. }
                | Error::Backend { .. }
                | Error::Io(_)
                | Error::IoRead { .. }
        )
    }

    /// Check if the error is fatal (the process should exit)
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigParse { .. }
                | Error::ConfigValidation { .. }
                | Error::Internal(_)
        )
    }

    /// Get the exit code for CLI
    pub fn exit_code(&self) -> i32 {
        self.code().exit_code()
    }

    /// Diagnostic snapshot attached to a fatal workflow error, if any
    pub fn snapshot(&self) -> Option<&WorkflowSnapshot> {
        match self {
            Error::WorkflowFailed { snapshot, .. } | Error::WorkflowTimeout { snapshot, .. } => {
                snapshot.as_deref()
            }
            _ => None,
        }
    }

    // ─────────────────────────────────────────────────────────────
    // User-Friendly Messages
    // ─────────────────────────────────────────────────────────────

    /// Get a user-friendly suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Error::ConfigNotFound { .. } => Some(
                "Run 'regnav config init' to create a default configuration file."
            ),
            Error::ConfigParse { .. } => Some(
                "Check your configuration file syntax. Run 'regnav config validate' to see details."
            ),
            Error::ConfigValidation { .. } => Some(
                "Review the configuration file and fix the invalid values."
            ),
            Error::InvalidQuery { .. } => Some(
                "Provide a non-empty question and an expertise level between 1 and 5."
            ),
            Error::InvalidCoordinate { .. } => Some(
                "Coordinates are (pillar 1-5, level 1-4, branch 0.0-5.0, expertise 1-5)."
            ),
            Error::Backend { .. } => Some(
                "Check the [openai] settings, or run with '--backend mock' to work offline."
            ),
            Error::WorkflowTimeout { .. } => Some(
                "Increase 'engine.timeout_secs' or 'consensus.persona_timeout_secs'."
            ),
            Error::WorkflowFailed { .. } => Some(
                "Rerun with -v to see each state's failure, or raise 'engine.max_retries'."
            ),
            Error::CorpusLoad { .. } => Some(
                "The corpus must be a JSON array of regulatory items. See 'storage.corpus_path'."
            ),
            _ => None,
        }
    }

    /// Format the error for terminal display with colors
    pub fn format_for_terminal(&self) -> String {
        let code = self.code();
        let mut output = format!("\x1b[31mError [{}]\x1b[0m: {}\n", code.as_str(), self);

        if let Some(snapshot) = self.snapshot() {
            output.push_str(&format!(
                "  after {} state visits: {}\n",
                snapshot.history.len(),
                snapshot.trail()
            ));
        }

        if let Some(hint) = self.suggestion() {
            output.push_str(&format!("\n\x1b[33mHint\x1b[0m: {}\n", hint));
        }

        output
    }

    /// Format the error for logging (no colors)
    pub fn format_for_log(&self) -> String {
        format!("[{}] {}", self.code().as_str(), self)
    }
}

// ─────────────────────────────────────────────────────────────────
// Error Constructors (for ergonomic error creation)
// ─────────────────────────────────────────────────────────────────

impl Error {
    /// Create a config validation error
    pub fn config_validation(message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: None,
        }
    }

    /// Create a config validation error with field name
    pub fn config_field_invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Error::ConfigValidation {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create an invalid query error
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Error::InvalidQuery {
            message: message.into(),
        }
    }

    /// Create an invalid coordinate error
    pub fn invalid_coordinate(message: impl Into<String>) -> Self {
        Error::InvalidCoordinate {
            message: message.into(),
        }
    }

    /// Create a processing error
    pub fn processing(message: impl Into<String>) -> Self {
        Error::Processing {
            message: message.into(),
        }
    }

    /// Create a backend error
    pub fn backend(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Backend {
            backend: backend.into(),
            message: message.into(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────
