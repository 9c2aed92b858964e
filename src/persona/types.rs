//! Core types for the persona consensus system.
//!
//! A persona is a configured expert viewpoint. Each one analyzes a query
//! independently; the consensus engine reconciles their results.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Free-form key/value context handed to personas alongside the query.
pub type AnalysisContext = BTreeMap<String, String>;

// ─────────────────────────────────────────────────────────────────
// Persona Kind
// ─────────────────────────────────────────────────────────────────

/// The expert viewpoints this build knows how to frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PersonaKind {
    /// Statutes, liability, regulatory interpretation.
    Legal,
    /// Capital, reporting, market and credit risk.
    Financial,
    /// Controls, audit, policy adherence.
    Compliance,
}

impl PersonaKind {
    pub fn slug(&self) -> &'static str {
        match self {
            PersonaKind::Legal => "legal",
            PersonaKind::Financial => "financial",
            PersonaKind::Compliance => "compliance",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PersonaKind::Legal => "Legal Expert",
            PersonaKind::Financial => "Financial Analyst",
            PersonaKind::Compliance => "Compliance Officer",
        }
    }

    pub fn all() -> &'static [PersonaKind] {
        &[
            PersonaKind::Legal,
            PersonaKind::Financial,
            PersonaKind::Compliance,
        ]
    }

    /// Framing used when this persona talks to an LLM.
    pub fn system_prompt(&self) -> &'static str {
        match self {
            PersonaKind::Legal => {
                "You are a regulatory lawyer. Interpret the applicable statutes and rules, \
                 identify obligations and liability exposure, and cite the provisions you rely on."
            }
            PersonaKind::Financial => {
                "You are a financial risk analyst. Assess capital, reporting and market-risk \
                 implications of the regulation and quantify exposure where possible."
            }
            PersonaKind::Compliance => {
                "You are a compliance officer. Map the regulation to concrete controls, audit \
                 evidence and policy changes an organisation needs to demonstrate compliance."
            }
        }
    }
}

impl fmt::Display for PersonaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for PersonaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "legal" => Ok(PersonaKind::Legal),
            "financial" | "finance" => Ok(PersonaKind::Financial),
            "compliance" => Ok(PersonaKind::Compliance),
            _ => Err(format!(
                "Unknown persona kind '{}'. Valid: legal, financial, compliance",
                s
            )),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Persona Profile (loaded from configuration)
// ─────────────────────────────────────────────────────────────────

/// One registered persona. Immutable once the registry is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaProfile {
    /// Unique id used in contribution maps and logs (e.g. "legal").
    pub id: String,

    pub kind: PersonaKind,

    /// Human-readable name.
    pub name: String,

    /// Domain summary, e.g. "regulatory law".
    #[serde(default)]
    pub domain: String,

    /// Ordered expertise vocabulary used for relevance scoring.
    pub expertise: Vec<String>,

    /// Configured confidence threshold in [0, 1].
    pub confidence_threshold: f64,

    /// Base consensus weight in [0, 1]; normalized per query.
    pub consensus_weight: f64,

    /// Seniority hint passed to the analysis backend.
    #[serde(default = "default_expertise_level")]
    pub expertise_level: String,

    #[serde(default)]
    pub certifications: Vec<String>,

    #[serde(default)]
    pub decision_rules: Vec<String>,
}

fn default_expertise_level() -> String {
    "expert".to_string()
}

impl PersonaProfile {
    pub fn new(
        id: impl Into<String>,
        kind: PersonaKind,
        expertise: &[&str],
        confidence_threshold: f64,
        consensus_weight: f64,
    ) -> Self {
        Self {
            id: id.into(),
            kind,
            name: kind.display_name().to_string(),
            domain: kind.slug().to_string(),
            expertise: expertise.iter().map(|s| s.to_string()).collect(),
            confidence_threshold,
            consensus_weight,
            expertise_level: default_expertise_level(),
            certifications: Vec::new(),
            decision_rules: Vec::new(),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Per-Persona Results
// ─────────────────────────────────────────────────────────────────

/// One persona's analysis of a query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaResult {
    pub persona_id: String,
    pub analysis: String,
    /// Reported confidence in [0, 1]
    pub confidence: f64,
    pub recommendations: Vec<String>,
    pub next_steps: Vec<String>,
    /// Set when the persona failed; the result is then degraded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PersonaResult {
    /// Placeholder for a persona that failed or never settled.
    pub fn degraded(persona_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            persona_id: persona_id.into(),
            analysis: String::new(),
            confidence: 0.0,
            recommendations: Vec::new(),
            next_steps: Vec::new(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

// ─────────────────────────────────────────────────────────────────
// Consensus Output
// ─────────────────────────────────────────────────────────────────

/// A persona's analysis text with its normalized weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedAnalysis {
    pub persona_id: String,
    pub weight: f64,
    /// The persona's own reported confidence
    pub confidence: f64,
    pub text: String,
}

/// A recommendation or next step tagged with its persona's weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightedItem {
    pub content: String,
    pub persona_id: String,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    /// Two or more personas contributed; every metric computed.
    Validated,
    /// Fewer than two personas; variance and diversity skipped.
    UnderValidated,
}

/// Quality metrics attached by `PersonaConsensusEngine::validate`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationMetrics {
    /// distinct / total recommendation texts; duplicates lower it
    pub recommendation_consistency: f64,
    /// Share of distinct recommendations raised by two or more personas
    pub corroboration: f64,
    /// Weighted variance of the contributors' configured thresholds
    pub threshold_variance: Option<f64>,
    /// Weighted variance of the contributors' reported confidences
    pub reported_confidence_variance: Option<f64>,
    pub persona_diversity: Option<f64>,
    pub validation_score: Option<f64>,
    pub status: ValidationStatus,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

/// The weighted reconciliation of every contributing persona.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    /// In registry order.
    pub analyses: Vec<WeightedAnalysis>,
    pub confidence: f64,
    /// Persona id -> normalized weight; sums to 1.
    pub contributions: BTreeMap<String, f64>,
    pub recommendations: Vec<WeightedItem>,
    pub next_steps: Vec<WeightedItem>,
    pub validation: Option<ValidationMetrics>,
}

impl ConsensusResult {
    /// Weight-prefixed concatenation of every analysis.
    pub fn combined_text(&self) -> String {
        self.analyses
            .iter()
            .map(|a| format!("{:.2} * {}", a.weight, a.text))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Recommendations merged on text, heaviest first.
    ///
    /// Weights of identical texts add up; ties keep first-seen order.
    pub fn merged_recommendations(&self) -> Vec<(String, f64)> {
        let mut merged: Vec<(String, f64)> = Vec::new();
        for item in &self.recommendations {
            match merged.iter_mut().find(|(text, _)| *text == item.content) {
                Some((_, weight)) => *weight += item.weight,
                None => merged.push((item.content.clone(), item.weight)),
            }
        }
        merged.sort_by(|a, b| b.1.total_cmp(&a.1));
        merged
    }

    /// Distinct recommendation texts, normalized for comparison.
    pub fn recommendation_set(&self) -> BTreeSet<String> {
        self.recommendations
            .iter()
            .map(|r| normalize_text(&r.content))
            .filter(|s| !s.is_empty())
            .collect()
    }

    pub fn contributor_count(&self) -> usize {
        self.contributions.len()
    }
}

/// Lowercase, collapse whitespace, drop trailing punctuation.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_lowercase()
}
