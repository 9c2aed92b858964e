//! Analysis backends: the external service each persona consults.

mod mock;
mod openai;
mod traits;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use mock::{MockBackend, MockConfig, REVIEW_PASS_KEY};
pub use openai::{OpenAiBackend, OpenAiConfig};
pub use traits::{AnalysisBackend, AnalysisOutput};

use crate::error::Result;

/// Supported backend kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Deterministic offline backend
    Mock,
    /// OpenAI-compatible chat completions
    OpenAi,
}

impl BackendKind {
    pub fn all() -> &'static [BackendKind] {
        &[BackendKind::Mock, BackendKind::OpenAi]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Mock => "mock",
            BackendKind::OpenAi => "openai",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mock" => Ok(BackendKind::Mock),
            "openai" => Ok(BackendKind::OpenAi),
            _ => Err(format!("Unknown backend '{}'. Valid: mock, openai", s)),
        }
    }
}

/// Build the configured backend.
pub fn create_backend(kind: BackendKind, openai: &OpenAiConfig) -> Result<Arc<dyn AnalysisBackend>> {
    match kind {
        BackendKind::Mock => Ok(Arc::new(MockBackend::new())),
        BackendKind::OpenAi => Ok(Arc::new(OpenAiBackend::new(openai.clone())?)),
    }
}
