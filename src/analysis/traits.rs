//! The external analysis capability each persona calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::persona::{AnalysisContext, PersonaProfile};

/// What a backend returns for one persona's view of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisOutput {
    pub analysis: String,
    /// In [0, 1]; out-of-range values are clamped by the consensus engine.
    pub confidence: f64,
    #[serde(default)]
    pub recommendations: Vec<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

/// A service able to analyze a query from one persona's viewpoint.
///
/// Implementations must be callable concurrently for different personas.
/// Any error or timeout counts as that persona's failure only.
#[async_trait]
pub trait AnalysisBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn analyze(
        &self,
        profile: &PersonaProfile,
        query: &str,
        context: &AnalysisContext,
    ) -> Result<AnalysisOutput>;
}
