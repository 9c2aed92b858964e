//! Persona system: expert viewpoints and their weighted consensus.
//!
//! The registry holds the configured personas. The consensus engine scores
//! them against a query, runs the relevant ones concurrently through an
//! [`AnalysisBackend`](crate::analysis::AnalysisBackend) and reconciles the
//! results into one [`ConsensusResult`].

pub mod consensus;
pub mod registry;
pub mod types;

pub use consensus::{ConsensusSettings, PanelOutcome, PersonaConsensusEngine};
pub use registry::PersonaRegistry;
pub use types::{
    normalize_text, AnalysisContext, ConsensusResult, PersonaKind, PersonaProfile, PersonaResult,
    ValidationMetrics, ValidationStatus, WeightedAnalysis, WeightedItem,
};
