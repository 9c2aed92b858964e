//! Compliance decisions over the coordinate space.

mod verifier;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub use verifier::{ComplianceSettings, ComplianceVerifier};

use crate::space::Coordinate4D;

/// An organisation or system whose compliance is being assessed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    pub coordinate: Coordinate4D,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl Entity {
    pub fn new(id: impl Into<String>, coordinate: Coordinate4D) -> Self {
        Self {
            id: id.into(),
            coordinate,
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingBasis {
    /// Requirements compared against entity attributes
    Direct,
    /// Propagated from prerequisite items
    Inferred,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub compliant: bool,
    pub basis: FindingBasis,
    /// Unmet requirement keys (direct) or prerequisites (inferred)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unmet: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComplianceDecision {
    Pass,
    Fail,
    /// Not decidable automatically; needs a human
    Escalate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub entity_id: String,
    pub applicable: Vec<String>,
    pub findings: BTreeMap<String, Finding>,
    pub decision: ComplianceDecision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Discrepancy {
    OnlyInPrimary { recommendation: String },
    OnlyInIndependent { recommendation: String },
    ConfidenceGap { primary: f64, independent: f64 },
}

/// Outcome of comparing a consensus with its independent review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub consensus_score: f64,
    pub discrepancies: Vec<Discrepancy>,
    pub needs_refinement: bool,
    pub verified: bool,
    pub recommendation: String,
}
