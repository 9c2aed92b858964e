//! Explanation trees mirroring the path a query took.

use serde::{Deserialize, Serialize};

use super::state::{WorkflowContext, WorkflowState};

/// One reasoning step. Leaves carry their own confidence; an inner
/// node's overall confidence is derived from its children.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationNode {
    pub step: String,
    pub reasoning: String,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub evidence: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sub_steps: Vec<ExplanationNode>,
}

impl ExplanationNode {
    pub fn leaf(step: impl Into<String>, reasoning: impl Into<String>, confidence: f64) -> Self {
        Self {
            step: step.into(),
            reasoning: reasoning.into(),
            confidence,
            evidence: Vec::new(),
            sub_steps: Vec::new(),
        }
    }

    pub fn with_evidence(mut self, evidence: impl IntoIterator<Item = String>) -> Self {
        self.evidence.extend(evidence);
        self
    }

    pub fn with_children(mut self, children: Vec<ExplanationNode>) -> Self {
        self.sub_steps = children;
        self
    }

    /// Unweighted recursive mean.
    ///
    /// A leaf returns its own confidence. An inner node returns the plain
    /// average of its children's overall confidences, regardless of how
    /// much evidence or how many descendants each child has, and ignores
    /// its own `confidence` field.
    pub fn overall_confidence(&self) -> f64 {
        if self.sub_steps.is_empty() {
            return self.confidence;
        }
        let sum: f64 = self.sub_steps.iter().map(Self::overall_confidence).sum();
        sum / self.sub_steps.len() as f64
    }

    /// Depth-first count of nodes, root included.
    pub fn node_count(&self) -> usize {
        1 + self.sub_steps.iter().map(Self::node_count).sum::<usize>()
    }

    /// Build the tree for a finished context: one child per state that
    /// produced output, in canonical order, using each state's latest
    /// output.
    pub fn from_context(ctx: &WorkflowContext) -> Self {
        let mut steps = Vec::new();

        for state in WorkflowState::ACTIVE {
            let node = match state {
                WorkflowState::QueryParsing => ctx.parsed().map(|p| {
                    let confidence = if p.pillar_hints.is_empty() { 0.8 } else { 1.0 };
                    ExplanationNode::leaf(
                        state.label(),
                        format!("Read the question as {:?} with {} keywords", p.intent, p.keywords.len()),
                        confidence,
                    )
                    .with_evidence(p.keywords.iter().cloned())
                }),
                WorkflowState::Contextualization => ctx.contextualized().map(|c| {
                    ExplanationNode::leaf(
                        state.label(),
                        format!(
                            "Placed the question at {} ({})",
                            c.coordinate,
                            c.domain.as_deref().unwrap_or("default pillar")
                        ),
                        1.0,
                    )
                }),
                WorkflowState::DataRetrieval => ctx.retrieval().map(|r| {
                    let top = r.candidates.first().map(|c| c.score).unwrap_or(0.0);
                    ExplanationNode::leaf(
                        state.label(),
                        format!("Retrieved {} candidate regulations", r.candidates.len()),
                        top.min(1.0),
                    )
                    .with_evidence(r.candidates.iter().map(|c| c.id.clone()))
                }),
                WorkflowState::GapAnalysis => ctx.gaps().map(|g| {
                    ExplanationNode::leaf(
                        state.label(),
                        format!("Coverage gap severity {:.2}", g.severity),
                        (1.0 - g.severity).clamp(0.0, 1.0),
                    )
                    .with_evidence(g.mitigations.iter().cloned())
                }),
                WorkflowState::ExpertReasoning => ctx.reasoning().map(|r| {
                    let node = ExplanationNode::leaf(
                        state.label(),
                        format!("Reasoned from {} and {} related regulations", r.primary_id, r.related.len()),
                        r.confidence,
                    )
                    .with_evidence(r.related.iter().map(|rel| format!("{} ({})", rel.id, rel.relationship_type)));
                    match r.consensus {
                        Some(ref consensus) => node.with_children(
                            consensus
                                .analyses
                                .iter()
                                .map(|a| {
                                    ExplanationNode::leaf(
                                        a.persona_id.clone(),
                                        a.text.clone(),
                                        a.confidence,
                                    )
                                    .with_evidence([format!("weight {:.3}", a.weight)])
                                })
                                .collect(),
                        ),
                        None => node,
                    }
                }),
                WorkflowState::ComplianceCheck => ctx.compliance().map(|c| {
                    let (reasoning, confidence) = match c.verification {
                        Some(ref v) => (v.recommendation.clone(), v.consensus_score),
                        None => ("No consensus to verify".to_string(), 1.0),
                    };
                    ExplanationNode::leaf(state.label(), reasoning, confidence)
                }),
                WorkflowState::ResponseGeneration => ctx.response().map(|r| {
                    ExplanationNode::leaf(
                        state.label(),
                        format!("Answered with {} related regulations", r.related_regulations.len()),
                        1.0,
                    )
                }),
                WorkflowState::Complete => None,
            };
            steps.extend(node);
        }

        let root = ExplanationNode::leaf(
            "Query Processing",
            format!("Processed '{}'", ctx.request.query),
            0.0,
        )
        .with_children(steps);
        ExplanationNode {
            confidence: root.overall_confidence(),
            ..root
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_confidence() {
        assert_eq!(ExplanationNode::leaf("a", "", 0.42).overall_confidence(), 0.42);
    }

    #[test]
    fn test_average_is_not_weighted_by_subtree_size() {
        // Left subtree has three leaves averaging 0.2, right is one leaf at 1.0.
        let left = ExplanationNode::leaf("left", "", 0.9).with_children(vec![
            ExplanationNode::leaf("l1", "", 0.1),
            ExplanationNode::leaf("l2", "", 0.2),
            ExplanationNode::leaf("l3", "", 0.3),
        ]);
        let right = ExplanationNode::leaf("right", "", 1.0);
        let root = ExplanationNode::leaf("root", "", 0.0).with_children(vec![left, right]);

        assert!((root.overall_confidence() - 0.6).abs() < 1e-12);
        assert_eq!(root.node_count(), 6);
    }

    #[test]
    fn test_tree_follows_context() {
        use crate::workflow::stages::{GapReport, ParsedQuery, QueryIntent};
        use crate::workflow::{QueryRequest, StateOutput};

        let mut ctx = WorkflowContext::new(QueryRequest::new("capital rules"), tokio::time::Instant::now());
        ctx.push_output(
            WorkflowState::QueryParsing,
            StateOutput::Parsed(ParsedQuery {
                keywords: vec!["capital".to_string(), "rules".to_string()],
                intent: QueryIntent::General,
                pillar_hints: vec![],
            }),
        );
        ctx.push_output(
            WorkflowState::GapAnalysis,
            StateOutput::Gaps(GapReport {
                uncovered_keywords: vec![],
                low_relevance: vec![],
                severity: 0.4,
                mitigations: vec![],
            }),
        );

        let tree = ExplanationNode::from_context(&ctx);
        let steps: Vec<&str> = tree.sub_steps.iter().map(|n| n.step.as_str()).collect();
        assert_eq!(steps, vec!["Query Parsing", "Gap Analysis"]);
        assert_eq!(tree.sub_steps[0].evidence, vec!["capital", "rules"]);
        // (0.8 + 0.6) / 2
        assert!((tree.confidence - 0.7).abs() < 1e-12);
    }
}
