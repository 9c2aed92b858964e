//! State handlers: what each workflow state actually does.
//!
//! The machine only knows states and outcomes. [`StageExecutor`] is the
//! seam between the two; [`RegulatoryStages`] is the production
//! implementation over the coordinate space, the persona panel and the
//! compliance verifier.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::query::{format_for_expertise, RelatedRegulation};
use super::state::{StateOutput, WorkflowContext, WorkflowState};
use crate::analysis::REVIEW_PASS_KEY;
use crate::compliance::{ComplianceReport, ComplianceVerifier, VerificationReport};
use crate::error::{Error, Result};
use crate::persona::{AnalysisContext, ConsensusResult, PersonaConsensusEngine};
use crate::space::{
    Coordinate4D, CoordinateMapper, CoordinateSpace, RegulatoryStore, RelatedItem,
    DEFAULT_TRAVERSAL_DEPTH,
};

/// Candidates scoring below this are reported as weakly relevant.
const LOW_RELEVANCE_SCORE: f64 = 0.5;

/// Score bonus per query keyword found in a candidate's text.
const KEYWORD_BONUS: f64 = 0.1;

const MIN_KEYWORD_CHARS: usize = 3;

const STOPWORDS: &[&str] = &[
    "about", "all", "and", "any", "are", "can", "could", "does", "for", "from", "has", "have",
    "how", "into", "its", "our", "should", "that", "the", "their", "there", "these", "this",
    "those", "under", "was", "what", "when", "where", "which", "who", "why", "will", "with",
    "would", "you", "your",
];

/// Words that point at a pillar without naming it.
const PILLAR_SYNONYMS: &[(&str, &str)] = &[
    ("audit", "COMPLIANCE"),
    ("cybersecurity", "COMPLIANCE"),
    ("privacy", "COMPLIANCE"),
    ("regulatory", "COMPLIANCE"),
    ("board", "GOVERNANCE"),
    ("capital", "GOVERNANCE"),
    ("financial", "GOVERNANCE"),
    ("continuity", "OPERATIONS"),
    ("resilience", "OPERATIONS"),
    ("hazard", "SAFETY"),
    ("workplace", "SAFETY"),
    ("manufacturing", "QUALITY"),
];

const URGENT_WORDS: &[&str] = &["urgent", "immediately", "deadline"];

// ─────────────────────────────────────────────────────────────────
// Stage Outputs
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryIntent {
    Requirements,
    Applicability,
    Comparison,
    General,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedQuery {
    /// Lowercase content words, first occurrence order
    pub keywords: Vec<String>,
    pub intent: QueryIntent,
    /// Pillar names the query points at, strongest first
    pub pillar_hints: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Normal,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContextualizedQuery {
    /// Where the question sits in the regulatory space
    pub coordinate: Coordinate4D,
    /// User expertise normalized to [0, 1]
    pub expertise: f64,
    pub priority: Priority,
    pub domain: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub id: String,
    pub tag: String,
    pub distance: f64,
    pub score: f64,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievalResult {
    /// Best first
    pub candidates: Vec<Candidate>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GapReport {
    /// Query keywords no candidate mentions
    pub uncovered_keywords: Vec<String>,
    /// Candidate ids below the relevance floor
    pub low_relevance: Vec<String>,
    /// 0 = full coverage, 1 = nothing usable
    pub severity: f64,
    pub mitigations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReasoningResult {
    pub primary_id: String,
    pub related: Vec<RelatedItem>,
    /// `None` when no persona was relevant
    pub consensus: Option<ConsensusResult>,
    pub confidence: f64,
    /// What the user supplied; the only context relevance is scored on
    pub persona_context: AnalysisContext,
    /// Workflow entries handed to the backend alongside the context
    pub notes: AnalysisContext,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComplianceOutcome {
    pub verification: Option<VerificationReport>,
    pub entity: Option<ComplianceReport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseDraft {
    pub text: String,
    pub related_regulations: Vec<RelatedRegulation>,
}

// ─────────────────────────────────────────────────────────────────
// Executor Trait
// ─────────────────────────────────────────────────────────────────

/// Runs one active state against the context accumulated so far.
///
/// Implementations read the context and return a typed output; they
/// never mutate it. An `Err` is a state failure and is routed by the
/// transition table.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    async fn execute(&self, state: WorkflowState, ctx: &WorkflowContext) -> Result<StateOutput>;
}

#[derive(Debug, Clone)]
pub struct StageSettings {
    /// Upper bound on retrieval candidates
    pub nearest_k: usize,
    /// Radius of the coarse retrieval scan
    pub contextual_radius: f64,
    /// Crosswalk hops explored from the primary regulation
    pub traversal_depth: usize,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            nearest_k: 10,
            contextual_radius: 2.0,
            traversal_depth: DEFAULT_TRAVERSAL_DEPTH,
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Regulatory Stages
// ─────────────────────────────────────────────────────────────────

pub struct RegulatoryStages {
    space: Arc<CoordinateSpace>,
    store: Arc<dyn RegulatoryStore>,
    mapper: Arc<CoordinateMapper>,
    engine: Arc<PersonaConsensusEngine>,
    verifier: Arc<ComplianceVerifier>,
    settings: StageSettings,
}

fn missing(input: &str, state: WorkflowState) -> Error {
    Error::processing(format!("{} requires {}, which has not been produced", state, input))
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric() && c != '-')
        .map(|t| t.trim_matches('-').to_lowercase())
        .filter(|t| !t.is_empty())
}

fn detect_intent(tokens: &[String]) -> QueryIntent {
    let has = |words: &[&str]| tokens.iter().any(|t| words.contains(&t.as_str()));
    if has(&["compare", "comparison", "difference", "versus", "vs"]) {
        QueryIntent::Comparison
    } else if has(&["apply", "applies", "applicable", "applicability", "scope"]) {
        QueryIntent::Applicability
    } else if has(&["require", "required", "requirement", "requirements", "must", "obligation", "obligations"]) {
        QueryIntent::Requirements
    } else {
        QueryIntent::General
    }
}

impl RegulatoryStages {
    pub fn new(
        space: Arc<CoordinateSpace>,
        store: Arc<dyn RegulatoryStore>,
        mapper: Arc<CoordinateMapper>,
        engine: Arc<PersonaConsensusEngine>,
        verifier: Arc<ComplianceVerifier>,
        settings: StageSettings,
    ) -> Self {
        Self {
            space,
            store,
            mapper,
            engine,
            verifier,
            settings,
        }
    }

    pub fn settings(&self) -> &StageSettings {
        &self.settings
    }

    /// Pillar name a single word points at, if any.
    fn pillar_hint(&self, word: &str) -> Option<String> {
        let upper = word.to_uppercase();
        if self.mapper.tables().pillars.contains_key(&upper) {
            return Some(upper);
        }
        PILLAR_SYNONYMS
            .iter()
            .find(|(w, _)| *w == word)
            .map(|(_, pillar)| pillar.to_string())
            .filter(|p| self.mapper.tables().pillars.contains_key(p))
    }

    // ─── Query Parsing ───

    pub fn parse(&self, query: &str) -> Result<ParsedQuery> {
        let tokens: Vec<String> = tokenize(query).collect();
        let intent = detect_intent(&tokens);

        let mut seen = BTreeSet::new();
        let keywords: Vec<String> = tokens
            .into_iter()
            .filter(|t| t.chars().count() >= MIN_KEYWORD_CHARS)
            .filter(|t| !STOPWORDS.contains(&t.as_str()))
            .filter(|t| seen.insert(t.clone()))
            .collect();

        if keywords.is_empty() {
            return Err(Error::processing(format!(
                "no content words found in query '{}'",
                query
            )));
        }

        let mut pillar_hints: Vec<String> = Vec::new();
        for hint in keywords.iter().filter_map(|k| self.pillar_hint(k)) {
            if !pillar_hints.contains(&hint) {
                pillar_hints.push(hint);
            }
        }

        Ok(ParsedQuery {
            keywords,
            intent,
            pillar_hints,
        })
    }

    // ─── Contextualization ───

    pub fn contextualize(&self, parsed: &ParsedQuery, ctx: &WorkflowContext) -> Result<ContextualizedQuery> {
        let user = &ctx.request.user_context;

        let domain = parsed.pillar_hints.first().cloned().or_else(|| {
            user.industry
                .as_deref()
                .and_then(|industry| tokenize(industry).find_map(|w| self.pillar_hint(&w)))
        });
        let pillar = self.mapper.pillar_for(domain.as_deref());
        let level = user.expertise_level.clamp(1, 4);
        let expertise = user.expertise_level.clamp(1, 5);
        let coordinate = Coordinate4D::new(pillar, level, 1.0, expertise)?;

        let lowered = ctx.request.query.to_lowercase();
        let urgent = URGENT_WORDS.iter().any(|w| lowered.contains(w))
            || user
                .extra
                .get("priority")
                .is_some_and(|p| p.eq_ignore_ascii_case("high"));

        Ok(ContextualizedQuery {
            coordinate,
            expertise: f64::from(expertise - 1) / 4.0,
            priority: if urgent { Priority::High } else { Priority::Normal },
            domain,
        })
    }

    // ─── Data Retrieval ───

    /// Radius scan around the query point, topped up with nearest
    /// neighbours, then ranked by proximity plus keyword overlap.
    pub fn retrieve(&self, parsed: &ParsedQuery, contextual: &ContextualizedQuery) -> Result<RetrievalResult> {
        let coord = &contextual.coordinate;
        let mut hits = self.space.within_radius(coord, self.settings.contextual_radius);
        if hits.len() < self.settings.nearest_k {
            for n in self.space.nearest_neighbors(coord, self.settings.nearest_k) {
                if !hits.iter().any(|h| h.id == n.id) {
                    hits.push(n);
                }
            }
        }

        let mut candidates: Vec<Candidate> = hits
            .into_iter()
            .filter_map(|n| {
                let item = self.store.get(&n.id)?;
                let haystack = format!("{} {}", item.tag, item.content).to_lowercase();
                let matched_keywords: Vec<String> = parsed
                    .keywords
                    .iter()
                    .filter(|k| haystack.contains(k.as_str()))
                    .cloned()
                    .collect();
                let score = 1.0 / (1.0 + n.distance) + KEYWORD_BONUS * matched_keywords.len() as f64;
                Some(Candidate {
                    id: n.id,
                    tag: item.tag.clone(),
                    distance: n.distance,
                    score,
                    matched_keywords,
                })
            })
            .collect();

        candidates.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        candidates.truncate(self.settings.nearest_k);

        if candidates.is_empty() {
            return Err(Error::processing(format!("no regulations found near {}", coord)));
        }
        Ok(RetrievalResult { candidates })
    }

    // ─── Gap Analysis ───

    pub fn analyze_gaps(&self, parsed: &ParsedQuery, retrieval: &RetrievalResult) -> GapReport {
        let uncovered_keywords: Vec<String> = parsed
            .keywords
            .iter()
            .filter(|k| !retrieval.candidates.iter().any(|c| c.matched_keywords.contains(k)))
            .cloned()
            .collect();
        let low_relevance: Vec<String> = retrieval
            .candidates
            .iter()
            .filter(|c| c.score < LOW_RELEVANCE_SCORE)
            .map(|c| c.id.clone())
            .collect();

        let ratio = |part: usize, whole: usize| if whole == 0 { 0.0 } else { part as f64 / whole as f64 };
        let severity = (ratio(uncovered_keywords.len(), parsed.keywords.len())
            + ratio(low_relevance.len(), retrieval.candidates.len()))
            / 2.0;

        let mut mitigations = Vec::new();
        if !uncovered_keywords.is_empty() {
            mitigations.push(format!(
                "No retrieved regulation mentions: {}",
                uncovered_keywords.join(", ")
            ));
        }
        if !low_relevance.is_empty() {
            mitigations.push(format!(
                "Treat {} weakly related regulations as background only",
                low_relevance.len()
            ));
        }
        if severity > 0.5 {
            mitigations.push("Have a specialist review the answer before relying on it".to_string());
        }

        GapReport {
            uncovered_keywords,
            low_relevance,
            severity,
            mitigations,
        }
    }

    // ─── Expert Reasoning ───

    /// Pick the primary regulation, walk its crosswalks and ask the
    /// persona panel. A panel where every persona failed fails the state.
    pub async fn reason(&self, retrieval: &RetrievalResult, ctx: &WorkflowContext) -> Result<ReasoningResult> {
        let primary = retrieval
            .candidates
            .iter()
            .find(|c| !c.matched_keywords.is_empty())
            .or_else(|| retrieval.candidates.first())
            .ok_or_else(|| Error::processing("no candidate regulation to reason about"))?;

        let related = self
            .space
            .related_items(&primary.id, None, self.settings.traversal_depth)
            .unwrap_or_default();

        let persona_context = ctx.request.user_context.to_analysis_context();
        let notes = AnalysisContext::from([("primary_regulation".to_string(), primary.id.clone())]);

        let consensus = self
            .engine
            .consensus_with_notes(&ctx.request.query, &persona_context, &notes, Some(ctx.deadline))
            .await?;
        let confidence = consensus.as_ref().map(|c| c.confidence).unwrap_or(0.5);

        info!(
            primary = %primary.id,
            related = related.len(),
            personas = consensus.as_ref().map(|c| c.contributor_count()).unwrap_or(0),
            confidence,
            "Expert reasoning complete"
        );

        Ok(ReasoningResult {
            primary_id: primary.id.clone(),
            related,
            consensus,
            confidence,
            persona_context,
            notes,
        })
    }

    // ─── Compliance Check ───

    /// Re-run the panel as an independent review and compare. Agreement
    /// below the configured threshold fails the state.
    ///
    /// The review needs time of its own: once the query deadline has
    /// passed it is skipped and the primary consensus stands unverified.
    pub async fn check_compliance(&self, reasoning: &ReasoningResult, ctx: &WorkflowContext) -> Result<ComplianceOutcome> {
        let verification = match reasoning.consensus {
            Some(_) if Instant::now() >= ctx.deadline => {
                warn!("No time left for an independent review; answer stays unverified");
                None
            }
            Some(ref primary) => {
                let mut review_notes = reasoning.notes.clone();
                review_notes.insert(REVIEW_PASS_KEY.to_string(), "independent".to_string());
                let independent = self
                    .engine
                    .consensus_with_notes(
                        &ctx.request.query,
                        &reasoning.persona_context,
                        &review_notes,
                        Some(ctx.deadline),
                    )
                    .await?;
                independent.map(|review| self.verifier.verify_analysis(primary, &review))
            }
            None => None,
        };

        if let Some(ref report) = verification {
            if report.needs_refinement {
                return Err(Error::RefinementRequired {
                    consensus_score: report.consensus_score,
                    threshold: self.verifier.settings().consensus_threshold,
                });
            }
        }

        let entity = ctx.request.entity.as_ref().map(|e| self.verifier.verify_entity(e));

        Ok(ComplianceOutcome {
            verification,
            entity,
        })
    }

    // ─── Response Generation ───

    fn related_regulations(&self, reasoning: &ReasoningResult) -> Vec<RelatedRegulation> {
        let describe = |id: &str, relationship: &str, depth: usize| {
            self.store.get(id).map(|item| RelatedRegulation {
                id: item.id.clone(),
                nuremberg: item.nuremberg().to_string(),
                tag: item.tag.clone(),
                relationship: relationship.to_string(),
                depth,
            })
        };

        describe(&reasoning.primary_id, "primary", 0)
            .into_iter()
            .chain(
                reasoning
                    .related
                    .iter()
                    .filter_map(|r| describe(&r.id, &r.relationship_type, r.depth)),
            )
            .collect()
    }

    /// Assemble the answer from whatever the context holds. Runs even
    /// after an early failure, in which case it explains what is missing.
    pub fn respond(&self, ctx: &WorkflowContext) -> ResponseDraft {
        let level = ctx.request.user_context.expertise_level;

        let Some(reasoning) = ctx.reasoning() else {
            let text = match ctx.parsed() {
                None => "The question could not be interpreted. Please rephrase it and name the \
                         regulatory topic you are asking about."
                    .to_string(),
                Some(_) => "No regulation could be analysed for this question.".to_string(),
            };
            return ResponseDraft {
                text,
                related_regulations: Vec::new(),
            };
        };

        let mut text = match reasoning.consensus {
            Some(ref consensus) => format_for_expertise(
                level,
                &consensus.combined_text(),
                &consensus.merged_recommendations(),
            ),
            None => {
                let closest = self
                    .store
                    .get(&reasoning.primary_id)
                    .map(|item| format!("{} ({}): {}", item.id, item.nuremberg(), item.content))
                    .unwrap_or_else(|| reasoning.primary_id.clone());
                format_for_expertise(
                    level,
                    &format!(
                        "No expert persona matched this question. The closest regulation is {}",
                        closest
                    ),
                    &[],
                )
            }
        };

        if let Some(outcome) = ctx.compliance() {
            if let Some(ref verification) = outcome.verification {
                text.push_str(&format!("\n\nVerification: {}", verification.recommendation));
            }
            if let Some(ref report) = outcome.entity {
                text.push_str(&format!(
                    "\n\nCompliance of {}: {:?} ({} applicable regulations)",
                    report.entity_id,
                    report.decision,
                    report.applicable.len()
                ));
            }
        }

        ResponseDraft {
            text,
            related_regulations: self.related_regulations(reasoning),
        }
    }
}

#[async_trait]
impl StageExecutor for RegulatoryStages {
    async fn execute(&self, state: WorkflowState, ctx: &WorkflowContext) -> Result<StateOutput> {
        debug!(%state, query_id = %ctx.query_id, "Executing state");
        match state {
            WorkflowState::QueryParsing => self.parse(&ctx.request.query).map(StateOutput::Parsed),
            WorkflowState::Contextualization => {
                let parsed = ctx.parsed().ok_or_else(|| missing("a parsed query", state))?;
                self.contextualize(parsed, ctx).map(StateOutput::Contextualized)
            }
            WorkflowState::DataRetrieval => {
                let parsed = ctx.parsed().ok_or_else(|| missing("a parsed query", state))?;
                let contextual = ctx
                    .contextualized()
                    .ok_or_else(|| missing("a query coordinate", state))?;
                self.retrieve(parsed, contextual).map(StateOutput::Retrieved)
            }
            WorkflowState::GapAnalysis => {
                let parsed = ctx.parsed().ok_or_else(|| missing("a parsed query", state))?;
                let retrieval = ctx.retrieval().ok_or_else(|| missing("retrieved regulations", state))?;
                Ok(StateOutput::Gaps(self.analyze_gaps(parsed, retrieval)))
            }
            WorkflowState::ExpertReasoning => {
                let retrieval = ctx.retrieval().ok_or_else(|| missing("retrieved regulations", state))?;
                self.reason(retrieval, ctx).await.map(StateOutput::Reasoned)
            }
            WorkflowState::ComplianceCheck => {
                let reasoning = ctx.reasoning().ok_or_else(|| missing("expert reasoning", state))?;
                self.check_compliance(reasoning, ctx).await.map(StateOutput::Checked)
            }
            WorkflowState::ResponseGeneration => Ok(StateOutput::Responded(self.respond(ctx))),
            WorkflowState::Complete => Err(Error::Internal(
                "the terminal state has no handler".to_string(),
            )),
        }
    }
}
