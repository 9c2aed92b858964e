//! Entity compliance and independent verification of consensus analyses.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use super::{
    ComplianceDecision, ComplianceReport, Discrepancy, Entity, Finding, FindingBasis,
    VerificationReport,
};
use crate::persona::ConsensusResult;
use crate::space::{CoordinateSpace, RegulatoryStore};

/// Weight of recommendation overlap in the verification score; the
/// remainder goes to confidence agreement.
const OVERLAP_WEIGHT: f64 = 0.7;

/// Confidence gap above which the two passes are reported as disagreeing.
const CONFIDENCE_GAP_LIMIT: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct ComplianceSettings {
    /// Radius around an entity inside which items apply to it.
    pub compliance_radius: f64,
    /// Verification scores below this need refinement.
    pub consensus_threshold: f64,
}

impl Default for ComplianceSettings {
    fn default() -> Self {
        Self {
            compliance_radius: 1.0,
            consensus_threshold: 0.8,
        }
    }
}

pub struct ComplianceVerifier {
    space: Arc<CoordinateSpace>,
    store: Arc<dyn RegulatoryStore>,
    settings: ComplianceSettings,
}

impl ComplianceVerifier {
    pub fn new(
        space: Arc<CoordinateSpace>,
        store: Arc<dyn RegulatoryStore>,
        settings: ComplianceSettings,
    ) -> Self {
        Self {
            space,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &ComplianceSettings {
        &self.settings
    }

    /// Ids of the items within the compliance radius of the entity.
    pub fn applicable(&self, entity: &Entity) -> Vec<String> {
        self.space
            .within_radius(&entity.coordinate, self.settings.compliance_radius)
            .into_iter()
            .map(|n| n.id)
            .collect()
    }

    /// Every declared requirement must equal the entity's attribute exactly.
    /// An id missing from the store is non-compliant.
    pub fn check_direct(&self, entity: &Entity, item_ids: &[String]) -> BTreeMap<String, Finding> {
        item_ids
            .iter()
            .map(|id| {
                let finding = match self.store.get(id) {
                    Some(item) => {
                        let unmet: Vec<String> = item
                            .requirements
                            .iter()
                            .filter(|(key, expected)| entity.attributes.get(*key) != Some(*expected))
                            .map(|(key, _)| key.clone())
                            .collect();
                        Finding {
                            compliant: unmet.is_empty(),
                            basis: FindingBasis::Direct,
                            unmet,
                        }
                    }
                    None => Finding {
                        compliant: false,
                        basis: FindingBasis::Direct,
                        unmet: vec![format!("unknown item '{}'", id)],
                    },
                };
                (id.clone(), finding)
            })
            .collect()
    }

    /// Direct checks on applicable items, then one crosswalk hop outwards.
    ///
    /// A related item that was not itself checked directly is compliant
    /// when every prerequisite it declares was found compliant directly.
    /// An empty prerequisite list holds vacuously; a prerequisite outside
    /// the direct results, or an item missing from the store, fails closed.
    pub fn verify_entity(&self, entity: &Entity) -> ComplianceReport {
        let applicable = self.applicable(entity);
        let direct = self.check_direct(entity, &applicable);
        let mut findings = direct.clone();

        for id in &applicable {
            let Some(related) = self.space.related_items(id, None, 1) else {
                continue;
            };
            for rel in related {
                if findings.contains_key(&rel.id) {
                    continue;
                }
                let unmet: Vec<String> = match self.store.get(&rel.id) {
                    Some(item) => item
                        .prerequisites
                        .iter()
                        .filter(|p| !direct.get(*p).is_some_and(|f| f.compliant))
                        .cloned()
                        .collect(),
                    None => vec![format!("{} is not in the store", rel.id)],
                };
                findings.insert(
                    rel.id,
                    Finding {
                        compliant: unmet.is_empty(),
                        basis: FindingBasis::Inferred,
                        unmet,
                    },
                );
            }
        }

        let decision = decide(&applicable, &findings);
        info!(
            entity = %entity.id,
            applicable = applicable.len(),
            assessed = findings.len(),
            ?decision,
            "Entity compliance assessed"
        );

        ComplianceReport {
            entity_id: entity.id.clone(),
            applicable,
            findings,
            decision,
        }
    }

    /// Compare the primary consensus with an independent second pass.
    ///
    /// score = 0.7 · Jaccard(recommendation sets) + 0.3 · (1 − |Δconfidence|)
    /// where two empty sets count as full overlap.
    pub fn verify_analysis(
        &self,
        primary: &ConsensusResult,
        independent: &ConsensusResult,
    ) -> VerificationReport {
        let a = primary.recommendation_set();
        let b = independent.recommendation_set();

        let union = a.union(&b).count();
        let overlap = if union == 0 {
            1.0
        } else {
            a.intersection(&b).count() as f64 / union as f64
        };
        let gap = (primary.confidence - independent.confidence).abs().min(1.0);
        let consensus_score = OVERLAP_WEIGHT * overlap + (1.0 - OVERLAP_WEIGHT) * (1.0 - gap);

        let mut discrepancies: Vec<Discrepancy> = a
            .difference(&b)
            .map(|r| Discrepancy::OnlyInPrimary {
                recommendation: r.clone(),
            })
            .chain(b.difference(&a).map(|r| Discrepancy::OnlyInIndependent {
                recommendation: r.clone(),
            }))
            .collect();
        if gap > CONFIDENCE_GAP_LIMIT {
            discrepancies.push(Discrepancy::ConfidenceGap {
                primary: primary.confidence,
                independent: independent.confidence,
            });
        }

        let needs_refinement = consensus_score < self.settings.consensus_threshold;
        let recommendation = if needs_refinement {
            format!(
                "Refine the analysis: independent review agrees at {:.2} (< {:.2}) with {} discrepancies",
                consensus_score,
                self.settings.consensus_threshold,
                discrepancies.len()
            )
        } else if discrepancies.is_empty() {
            "Analysis confirmed by independent review".to_string()
        } else {
            format!(
                "Analysis confirmed; {} minor discrepancies noted",
                discrepancies.len()
            )
        };

        debug!(consensus_score, needs_refinement, discrepancies = discrepancies.len(), "Analysis verified");

        VerificationReport {
            consensus_score,
            discrepancies,
            needs_refinement,
            verified: !needs_refinement,
            recommendation,
        }
    }
}

fn decide(applicable: &[String], findings: &BTreeMap<String, Finding>) -> ComplianceDecision {
    if applicable.is_empty() {
        return ComplianceDecision::Escalate;
    }
    let failed = |basis: FindingBasis| {
        findings
            .values()
            .any(|f| f.basis == basis && !f.compliant)
    };
    if failed(FindingBasis::Direct) {
        ComplianceDecision::Fail
    } else if failed(FindingBasis::Inferred) {
        ComplianceDecision::Escalate
    } else {
        ComplianceDecision::Pass
    }
}
