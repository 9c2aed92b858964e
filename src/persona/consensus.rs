//! Persona selection, concurrent fan-out and weighted consensus.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::registry::PersonaRegistry;
use super::types::{
    AnalysisContext, ConsensusResult, PersonaResult, ValidationMetrics, ValidationStatus,
    WeightedAnalysis, WeightedItem,
};
use crate::analysis::AnalysisBackend;
use crate::error::{Error, Result};

/// Weights of the composite validation score.
const CONSISTENCY_WEIGHT: f64 = 0.4;
const VARIANCE_WEIGHT: f64 = 0.3;
const DIVERSITY_WEIGHT: f64 = 0.3;

// ─────────────────────────────────────────────────────────────────
// Settings & Outcomes
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ConsensusSettings {
    /// Personas scoring at or below this are left out of a query.
    pub relevance_threshold: f64,
    /// Panel size at which persona diversity saturates at 1.0.
    pub ideal_panel_size: usize,
    /// Budget for a single persona's analysis.
    pub persona_timeout: Duration,
}

impl Default for ConsensusSettings {
    fn default() -> Self {
        Self {
            relevance_threshold: 0.3,
            ideal_panel_size: 3,
            persona_timeout: Duration::from_secs(20),
        }
    }
}

/// Result of fanning a query out to the relevant personas.
#[derive(Debug, Clone)]
pub enum PanelOutcome {
    /// At least one relevant persona succeeded. Results are in registry
    /// order and include degraded entries for the ones that failed.
    Analyzed {
        results: Vec<PersonaResult>,
        scores: BTreeMap<String, f64>,
    },
    /// No persona cleared the relevance threshold.
    NoRelevantPersonas { scores: BTreeMap<String, f64> },
}

// ─────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────

pub struct PersonaConsensusEngine {
    registry: Arc<PersonaRegistry>,
    backend: Arc<dyn AnalysisBackend>,
    settings: ConsensusSettings,
}

fn keyword(raw: &str) -> String {
    raw.trim().to_lowercase().replace('_', " ")
}

fn sanitize_confidence(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Σ w·(x − x̄)² with x̄ = Σ w·x; weights already sum to 1.
fn weighted_variance(points: &[(f64, f64)]) -> f64 {
    let mean: f64 = points.iter().map(|(w, x)| w * x).sum();
    points.iter().map(|(w, x)| w * (x - mean).powi(2)).sum()
}

impl PersonaConsensusEngine {
    pub fn new(
        registry: Arc<PersonaRegistry>,
        backend: Arc<dyn AnalysisBackend>,
        settings: ConsensusSettings,
    ) -> Self {
        Self {
            registry,
            backend,
            settings,
        }
    }

    pub fn registry(&self) -> &PersonaRegistry {
        &self.registry
    }

    pub fn settings(&self) -> &ConsensusSettings {
        &self.settings
    }

    /// Keyword relevance of every registered persona.
    ///
    /// score = (vocabulary hits in the query + hits in the context values)
    ///         / vocabulary size
    ///
    /// Matching is case-insensitive substring search; underscores in a
    /// keyword match spaces. The score can exceed 1 when a keyword occurs
    /// in both the query and the context.
    pub fn score_personas(&self, query: &str, context: &AnalysisContext) -> Result<BTreeMap<String, f64>> {
        if query.trim().is_empty() {
            return Err(Error::invalid_query("query must be a non-empty string"));
        }

        let query_text = query.to_lowercase();
        let context_text = context
            .values()
            .map(|v| v.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");

        let scores = self
            .registry
            .iter()
            .map(|profile| {
                let vocabulary: Vec<String> = profile
                    .expertise
                    .iter()
                    .map(|k| keyword(k))
                    .filter(|k| !k.is_empty())
                    .collect();
                let hits = vocabulary
                    .iter()
                    .map(|k| {
                        usize::from(query_text.contains(k.as_str()))
                            + usize::from(context_text.contains(k.as_str()))
                    })
                    .sum::<usize>();
                let score = if vocabulary.is_empty() {
                    0.0
                } else {
                    hits as f64 / vocabulary.len() as f64
                };
                (profile.id.clone(), score)
            })
            .collect();

        Ok(scores)
    }

    /// Ids scoring strictly above the relevance threshold, registry order.
    pub fn relevant(&self, scores: &BTreeMap<String, f64>) -> Vec<String> {
        self.registry
            .iter()
            .filter(|p| {
                scores
                    .get(&p.id)
                    .is_some_and(|s| *s > self.settings.relevance_threshold)
            })
            .map(|p| p.id.clone())
            .collect()
    }

    /// Run every relevant persona concurrently and wait for all of them.
    ///
    /// A persona that errors or exceeds its timeout yields a degraded
    /// result. When `deadline` passes, outstanding analyses are aborted
    /// and whatever settled is kept. Fails only if every relevant persona
    /// ended up degraded.
    pub async fn analyze_relevant(
        &self,
        query: &str,
        context: &AnalysisContext,
        deadline: Option<Instant>,
    ) -> Result<PanelOutcome> {
        self.analyze_with_notes(query, context, &AnalysisContext::new(), deadline)
            .await
    }

    /// [`Self::analyze_relevant`] with extra entries for the backend.
    ///
    /// Relevance is scored on `query` and `context` only. `notes` are
    /// merged into what each persona sees, so workflow bookkeeping (the
    /// item under discussion, a review marker) cannot change the panel.
    pub async fn analyze_with_notes(
        &self,
        query: &str,
        context: &AnalysisContext,
        notes: &AnalysisContext,
        deadline: Option<Instant>,
    ) -> Result<PanelOutcome> {
        let scores = self.score_personas(query, context)?;
        let relevant = self.relevant(&scores);

        if relevant.is_empty() {
            debug!(?scores, "No persona cleared the relevance threshold");
            return Ok(PanelOutcome::NoRelevantPersonas { scores });
        }

        let mut backend_context = context.clone();
        backend_context.extend(notes.iter().map(|(k, v)| (k.clone(), v.clone())));

        let pool = Arc::new(Semaphore::new(self.registry.len().max(1)));
        let mut tasks = JoinSet::new();

        for id in &relevant {
            let Some(profile) = self.registry.get(id).cloned() else {
                continue;
            };
            let backend = Arc::clone(&self.backend);
            let pool = Arc::clone(&pool);
            let query = query.to_string();
            let context = backend_context.clone();
            let timeout = self.settings.persona_timeout;

            tasks.spawn(async move {
                let _permit = pool.acquire_owned().await;
                let outcome =
                    match tokio::time::timeout(timeout, backend.analyze(&profile, &query, &context)).await {
                        Ok(result) => result,
                        Err(_) => Err(Error::PersonaTimeout {
                            persona: profile.id.clone(),
                            timeout_secs: timeout.as_secs(),
                        }),
                    };
                (profile.id, outcome)
            });
        }

        let mut settled: BTreeMap<String, PersonaResult> = BTreeMap::new();
        loop {
            let next = match deadline {
                Some(deadline) => match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                    Ok(next) => next,
                    Err(_) => {
                        warn!(
                            outstanding = tasks.len(),
                            "Query deadline reached, aborting outstanding persona analyses"
                        );
                        tasks.abort_all();
                        break;
                    }
                },
                None => tasks.join_next().await,
            };

            match next {
                None => break,
                Some(Ok((id, Ok(output)))) => {
                    self.registry.touch(&id);
                    debug!(persona = %id, confidence = output.confidence, "Persona analysis settled");
                    settled.insert(
                        id.clone(),
                        PersonaResult {
                            persona_id: id,
                            analysis: output.analysis,
                            confidence: sanitize_confidence(output.confidence),
                            recommendations: output.recommendations,
                            next_steps: output.next_steps,
                            error: None,
                        },
                    );
                }
                Some(Ok((id, Err(e)))) => {
                    self.registry.touch(&id);
                    warn!(persona = %id, error = %e, "Persona analysis failed");
                    settled.insert(id.clone(), PersonaResult::degraded(id, e.to_string()));
                }
                Some(Err(join_error)) => {
                    warn!(error = %join_error, "Persona task ended abnormally");
                }
            }
        }

        let results: Vec<PersonaResult> = relevant
            .iter()
            .map(|id| {
                settled.remove(id).unwrap_or_else(|| {
                    PersonaResult::degraded(id.clone(), "analysis did not settle before the deadline")
                })
            })
            .collect();

        if results.iter().all(PersonaResult::is_degraded) {
            return Err(Error::AllPersonasFailed {
                attempted: results.len(),
            });
        }

        info!(
            relevant = results.len(),
            failed = results.iter().filter(|r| r.is_degraded()).count(),
            "Persona panel settled"
        );

        Ok(PanelOutcome::Analyzed { results, scores })
    }

    /// Weighted reconciliation of the successful results.
    ///
    /// weight(p) = registry_weight(p) · score(p) / Σ over contributors.
    /// Only relevant, non-degraded personas contribute, so the
    /// contribution map sums to 1.
    pub fn combine(&self, results: &[PersonaResult], scores: &BTreeMap<String, f64>) -> Result<ConsensusResult> {
        let contributors: Vec<(&PersonaResult, f64)> = results
            .iter()
            .filter(|r| !r.is_degraded())
            .filter_map(|r| {
                let score = scores.get(&r.persona_id).copied()?;
                if score <= self.settings.relevance_threshold {
                    return None;
                }
                let profile = self.registry.get(&r.persona_id)?;
                Some((r, profile.consensus_weight * score))
            })
            .collect();

        let total: f64 = contributors.iter().map(|(_, raw)| raw).sum();
        if !total.is_finite() || total <= 0.0 {
            return Err(Error::ZeroConsensusWeight {
                personas: contributors.len(),
            });
        }

        let mut combined = ConsensusResult {
            analyses: Vec::new(),
            confidence: 0.0,
            contributions: BTreeMap::new(),
            recommendations: Vec::new(),
            next_steps: Vec::new(),
            validation: None,
        };

        for (result, raw) in contributors {
            if raw <= 0.0 {
                continue;
            }
            let weight = raw / total;
            let tag = |content: &String| WeightedItem {
                content: content.clone(),
                persona_id: result.persona_id.clone(),
                weight,
            };

            combined.contributions.insert(result.persona_id.clone(), weight);
            combined.confidence += weight * result.confidence;
            combined.analyses.push(WeightedAnalysis {
                persona_id: result.persona_id.clone(),
                weight,
                confidence: result.confidence,
                text: result.analysis.clone(),
            });
            combined.recommendations.extend(result.recommendations.iter().map(tag));
            combined.next_steps.extend(result.next_steps.iter().map(tag));
        }

        combined.confidence = sanitize_confidence(combined.confidence);
        Ok(combined)
    }

    /// Attach validation metrics.
    ///
    /// Consistency counts raw-text duplicates against the panel, while
    /// corroboration reports the opposite reading (agreement across
    /// personas). Threshold variance uses each contributor's configured
    /// threshold; the reported-confidence variance sits next to it.
    pub fn validate(&self, mut result: ConsensusResult) -> ConsensusResult {
        let total = result.recommendations.len();
        let mut raised_by: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for item in &result.recommendations {
            raised_by
                .entry(item.content.as_str())
                .or_default()
                .insert(item.persona_id.as_str());
        }
        let distinct = raised_by.len();
        let consistency = distinct as f64 / total.max(1) as f64;
        let corroboration = if distinct == 0 {
            0.0
        } else {
            raised_by.values().filter(|p| p.len() >= 2).count() as f64 / distinct as f64
        };

        let panel = result.contributions.len();
        let metrics = if panel < 2 {
            ValidationMetrics {
                recommendation_consistency: consistency,
                corroboration,
                threshold_variance: None,
                reported_confidence_variance: None,
                persona_diversity: None,
                validation_score: None,
                status: ValidationStatus::UnderValidated,
                warnings: vec!["Insufficient persona diversity for robust validation".to_string()],
            }
        } else {
            let thresholds: Vec<(f64, f64)> = result
                .analyses
                .iter()
                .filter_map(|a| {
                    self.registry
                        .get(&a.persona_id)
                        .map(|p| (a.weight, p.confidence_threshold))
                })
                .collect();
            let reported: Vec<(f64, f64)> =
                result.analyses.iter().map(|a| (a.weight, a.confidence)).collect();

            let variance = weighted_variance(&thresholds);
            let diversity =
                (panel as f64 / self.settings.ideal_panel_size.max(1) as f64).min(1.0);
            let score = CONSISTENCY_WEIGHT * consistency
                + VARIANCE_WEIGHT * (1.0 - variance)
                + DIVERSITY_WEIGHT * diversity;

            ValidationMetrics {
                recommendation_consistency: consistency,
                corroboration,
                threshold_variance: Some(variance),
                reported_confidence_variance: Some(weighted_variance(&reported)),
                persona_diversity: Some(diversity),
                validation_score: Some(score),
                status: ValidationStatus::Validated,
                warnings: Vec::new(),
            }
        };

        debug!(
            panel,
            consistency,
            score = ?metrics.validation_score,
            "Consensus validated"
        );
        result.validation = Some(metrics);
        result
    }

    /// Score, fan out, combine and validate in one call.
    ///
    /// `Ok(None)` when no persona is relevant to the query.
    pub async fn consensus(
        &self,
        query: &str,
        context: &AnalysisContext,
        deadline: Option<Instant>,
    ) -> Result<Option<ConsensusResult>> {
        self.consensus_with_notes(query, context, &AnalysisContext::new(), deadline)
            .await
    }

    /// [`Self::consensus`] with backend-only `notes`; see
    /// [`Self::analyze_with_notes`].
    pub async fn consensus_with_notes(
        &self,
        query: &str,
        context: &AnalysisContext,
        notes: &AnalysisContext,
        deadline: Option<Instant>,
    ) -> Result<Option<ConsensusResult>> {
        match self.analyze_with_notes(query, context, notes, deadline).await? {
            PanelOutcome::NoRelevantPersonas { .. } => Ok(None),
            PanelOutcome::Analyzed { results, scores } => {
                let combined = self.combine(&results, &scores)?;
                Ok(Some(self.validate(combined)))
            }
        }
    }
}
