//! Caller-facing request and response types.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::explanation::ExplanationNode;
use super::state::StateRecord;
use crate::compliance::{ComplianceReport, Entity, VerificationReport};
use crate::error::{Error, Result};
use crate::persona::{AnalysisContext, ValidationMetrics};

/// Upper bound on accepted query length, in characters.
pub const MAX_QUERY_CHARS: usize = 4_000;

const SUMMARY_CHARS: usize = 200;
const SIMPLE_CHARS: usize = 100;

// ─────────────────────────────────────────────────────────────────
// Request
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContext {
    /// 1 (beginner) to 5 (specialist)
    #[serde(default = "default_expertise_level")]
    pub expertise_level: u8,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

fn default_expertise_level() -> u8 {
    3
}

impl Default for UserContext {
    fn default() -> Self {
        Self {
            expertise_level: default_expertise_level(),
            role: None,
            industry: None,
            region: None,
            extra: BTreeMap::new(),
        }
    }
}

impl UserContext {
    /// Flatten into the key/value context personas see.
    pub fn to_analysis_context(&self) -> AnalysisContext {
        let mut ctx = self.extra.clone();
        ctx.insert("expertise_level".to_string(), self.expertise_level.to_string());
        for (key, value) in [
            ("role", &self.role),
            ("industry", &self.industry),
            ("region", &self.region),
        ] {
            if let Some(v) = value {
                ctx.insert(key.to_string(), v.clone());
            }
        }
        ctx
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub query: String,
    #[serde(default)]
    pub user_context: UserContext,
    /// Assess this entity's compliance as part of the answer.
    #[serde(default)]
    pub entity: Option<Entity>,
}

impl QueryRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            user_context: UserContext::default(),
            entity: None,
        }
    }

    pub fn with_expertise(mut self, level: u8) -> Self {
        self.user_context.expertise_level = level;
        self
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entity = Some(entity);
        self
    }

    /// Reject malformed input before any state runs.
    pub fn validate(&self) -> Result<()> {
        if self.query.trim().is_empty() {
            return Err(Error::invalid_query("query is empty"));
        }
        if self.query.chars().count() > MAX_QUERY_CHARS {
            return Err(Error::invalid_query(format!(
                "query exceeds {} characters",
                MAX_QUERY_CHARS
            )));
        }
        if !(1..=5).contains(&self.user_context.expertise_level) {
            return Err(Error::invalid_query(format!(
                "expertise level {} must be between 1 and 5",
                self.user_context.expertise_level
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────
// Response
// ─────────────────────────────────────────────────────────────────

/// A regulation surfaced while reasoning about the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelatedRegulation {
    pub id: String,
    pub nuremberg: String,
    pub tag: String,
    /// "primary" for the matched regulation, else the crosswalk type
    pub relationship: String,
    pub depth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse {
    pub query_id: Uuid,
    pub response_text: String,
    pub explanation_tree: ExplanationNode,
    pub confidence_score: f64,
    pub persona_contributions: BTreeMap<String, f64>,
    pub related_regulations: Vec<RelatedRegulation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<VerificationReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compliance: Option<ComplianceReport>,
    pub state_history: Vec<StateRecord>,
}

// ─────────────────────────────────────────────────────────────────
// Expertise-tiered formatting
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpertiseTier {
    Beginner,
    Intermediate,
    Expert,
}

impl ExpertiseTier {
    pub fn for_level(level: u8) -> Self {
        match level {
            0 | 1 => ExpertiseTier::Beginner,
            2 | 3 => ExpertiseTier::Intermediate,
            _ => ExpertiseTier::Expert,
        }
    }
}

fn truncate_chars(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        text.to_string()
    } else {
        let cut: String = text.chars().take(limit).collect();
        format!("{}...", cut.trim_end())
    }
}

/// Render an answer at the depth the reader can use.
///
/// Experts get the full analysis and every recommendation with its
/// weight, intermediate readers a summary and the top three, beginners a
/// short explanation and the single main takeaway.
pub fn format_for_expertise(level: u8, analysis: &str, recommendations: &[(String, f64)]) -> String {
    match ExpertiseTier::for_level(level) {
        ExpertiseTier::Expert => {
            let mut out = format!("Detailed analysis:\n{}", analysis);
            if !recommendations.is_empty() {
                out.push_str("\n\nRecommendations:");
                for (rec, weight) in recommendations {
                    out.push_str(&format!("\n- {} (weight {:.2})", rec, weight));
                }
            }
            out
        }
        ExpertiseTier::Intermediate => {
            let mut out = format!("Summary: {}", truncate_chars(analysis, SUMMARY_CHARS));
            if !recommendations.is_empty() {
                out.push_str("\n\nKey points:");
                for (rec, _) in recommendations.iter().take(3) {
                    out.push_str(&format!("\n- {}", rec));
                }
            }
            out
        }
        ExpertiseTier::Beginner => {
            let takeaway = recommendations
                .first()
                .map(|(rec, _)| rec.as_str())
                .unwrap_or("No specific action was identified.");
            format!(
                "Simple explanation: {}\n\nMain takeaway: {}",
                truncate_chars(analysis, SIMPLE_CHARS),
                takeaway
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recs() -> Vec<(String, f64)> {
        ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, r)| (r.to_string(), 0.4 - i as f64 * 0.1))
            .collect()
    }

    #[test]
    fn test_validate_request() {
        assert!(QueryRequest::new("What applies?").validate().is_ok());
        assert!(QueryRequest::new("  ").validate().is_err());
        assert!(QueryRequest::new("q").with_expertise(0).validate().is_err());
        assert!(QueryRequest::new("q").with_expertise(6).validate().is_err());
        assert!(QueryRequest::new("x".repeat(MAX_QUERY_CHARS + 1)).validate().is_err());
    }

    #[test]
    fn test_analysis_context_includes_profile() {
        let mut uc = UserContext {
            role: Some("CISO".to_string()),
            ..Default::default()
        };
        uc.extra.insert("sector".to_string(), "banking".to_string());
        let ctx = uc.to_analysis_context();
        assert_eq!(ctx["role"], "CISO");
        assert_eq!(ctx["sector"], "banking");
        assert_eq!(ctx["expertise_level"], "3");
        assert!(!ctx.contains_key("industry"));
    }

    #[test]
    fn test_expert_format_lists_everything() {
        let text = format_for_expertise(5, "full text", &recs());
        assert!(text.starts_with("Detailed analysis:\nfull text"));
        assert_eq!(text.matches("\n- ").count(), 4);
    }

    #[test]
    fn test_intermediate_format_truncates_and_keeps_top_three() {
        let long = "word ".repeat(100);
        let text = format_for_expertise(3, &long, &recs());
        assert!(text.starts_with("Summary: "));
        assert!(text.contains("..."));
        assert_eq!(text.matches("\n- ").count(), 3);
    }

    #[test]
    fn test_beginner_format() {
        let text = format_for_expertise(1, "short", &recs());
        assert_eq!(text, "Simple explanation: short\n\nMain takeaway: a");
        let empty = format_for_expertise(1, "short", &[]);
        assert!(empty.contains("No specific action"));
    }
}
