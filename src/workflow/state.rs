//! Workflow states, the transition table and per-query context.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::query::QueryRequest;
use super::stages::{
    ComplianceOutcome, ContextualizedQuery, GapReport, ParsedQuery, ReasoningResult, ResponseDraft,
    RetrievalResult,
};
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// States
// ─────────────────────────────────────────────────────────────────

/// The AoT states in canonical order. `Complete` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    QueryParsing,
    Contextualization,
    DataRetrieval,
    GapAnalysis,
    ExpertReasoning,
    ComplianceCheck,
    ResponseGeneration,
    Complete,
}

impl WorkflowState {
    pub const ALL: [WorkflowState; 8] = [
        WorkflowState::QueryParsing,
        WorkflowState::Contextualization,
        WorkflowState::DataRetrieval,
        WorkflowState::GapAnalysis,
        WorkflowState::ExpertReasoning,
        WorkflowState::ComplianceCheck,
        WorkflowState::ResponseGeneration,
        WorkflowState::Complete,
    ];

    /// Every state that executes work, i.e. all but `Complete`.
    pub const ACTIVE: [WorkflowState; 7] = [
        WorkflowState::QueryParsing,
        WorkflowState::Contextualization,
        WorkflowState::DataRetrieval,
        WorkflowState::GapAnalysis,
        WorkflowState::ExpertReasoning,
        WorkflowState::ComplianceCheck,
        WorkflowState::ResponseGeneration,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WorkflowState::QueryParsing => "query_parsing",
            WorkflowState::Contextualization => "contextualization",
            WorkflowState::DataRetrieval => "data_retrieval",
            WorkflowState::GapAnalysis => "gap_analysis",
            WorkflowState::ExpertReasoning => "expert_reasoning",
            WorkflowState::ComplianceCheck => "compliance_check",
            WorkflowState::ResponseGeneration => "response_generation",
            WorkflowState::Complete => "complete",
        }
    }

    /// Step label used in explanation trees.
    pub fn label(&self) -> &'static str {
        match self {
            WorkflowState::QueryParsing => "Query Parsing",
            WorkflowState::Contextualization => "Contextualization",
            WorkflowState::DataRetrieval => "Data Retrieval",
            WorkflowState::GapAnalysis => "Gap Analysis",
            WorkflowState::ExpertReasoning => "Expert Reasoning",
            WorkflowState::ComplianceCheck => "Compliance Check",
            WorkflowState::ResponseGeneration => "Response Generation",
            WorkflowState::Complete => "Complete",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkflowState::Complete)
    }

    fn active_index(&self) -> Option<usize> {
        WorkflowState::ACTIVE.iter().position(|s| s == self)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for WorkflowState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        WorkflowState::ALL
            .iter()
            .find(|state| state.name() == wanted)
            .copied()
            .ok_or_else(|| format!("Unknown workflow state '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Failure,
}

// ─────────────────────────────────────────────────────────────────
// Transition Table
// ─────────────────────────────────────────────────────────────────

/// Where a state goes next, as written in configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionRule {
    pub success: String,
    pub failure: String,
}

impl TransitionRule {
    pub fn new(success: WorkflowState, failure: WorkflowState) -> Self {
        Self {
            success: success.name().to_string(),
            failure: failure.name().to_string(),
        }
    }
}

/// A validated, total transition function over the active states.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionTable {
    /// (success, failure) indexed like `WorkflowState::ACTIVE`
    targets: [(WorkflowState, WorkflowState); 7],
}

impl TransitionTable {
    /// Build from configuration, requiring one rule per active state.
    pub fn from_rules(rules: &BTreeMap<String, TransitionRule>) -> Result<Self> {
        let parse = |field: String, raw: &str| -> Result<WorkflowState> {
            raw.parse::<WorkflowState>()
                .map_err(|e| Error::config_field_invalid(field, e))
        };

        let mut targets = [(WorkflowState::Complete, WorkflowState::Complete); 7];
        let mut seen = [false; 7];

        for (name, rule) in rules {
            let state = parse(format!("transitions.{}", name), name)?;
            let Some(index) = state.active_index() else {
                return Err(Error::config_field_invalid(
                    format!("transitions.{}", name),
                    "the terminal state cannot have outgoing transitions",
                ));
            };
            let success = parse(format!("transitions.{}.success", name), &rule.success)?;
            let failure = parse(format!("transitions.{}.failure", name), &rule.failure)?;
            if failure.is_terminal() {
                return Err(Error::config_field_invalid(
                    format!("transitions.{}.failure", name),
                    "a failure cannot complete the workflow",
                ));
            }
            targets[index] = (success, failure);
            seen[index] = true;
        }

        if let Some(missing) = WorkflowState::ACTIVE
            .iter()
            .zip(seen.iter())
            .find(|(_, present)| !**present)
            .map(|(state, _)| state)
        {
            return Err(Error::config_field_invalid(
                format!("transitions.{}", missing),
                format!("missing transition rule for '{}'", missing),
            ));
        }

        Ok(Self { targets })
    }

    /// The next state. Pure; `Complete` maps to itself.
    pub fn next(&self, state: WorkflowState, outcome: Outcome) -> WorkflowState {
        match state.active_index() {
            None => WorkflowState::Complete,
            Some(i) => match outcome {
                Outcome::Success => self.targets[i].0,
                Outcome::Failure => self.targets[i].1,
            },
        }
    }

    /// Rules in configuration form, one per active state.
    pub fn to_rules(&self) -> BTreeMap<String, TransitionRule> {
        WorkflowState::ACTIVE
            .iter()
            .zip(self.targets.iter())
            .map(|(state, (s, f))| (state.name().to_string(), TransitionRule::new(*s, *f)))
            .collect()
    }
}

impl Default for TransitionTable {
    /// Linear forward path; each failure falls back one step, parsing
    /// failures go straight to response generation.
    fn default() -> Self {
        use WorkflowState::*;
        Self {
            targets: [
                (Contextualization, ResponseGeneration),
                (DataRetrieval, QueryParsing),
                (GapAnalysis, Contextualization),
                (ExpertReasoning, DataRetrieval),
                (ComplianceCheck, GapAnalysis),
                (ResponseGeneration, ExpertReasoning),
                (Complete, ExpertReasoning),
            ],
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Stage Outputs
// ─────────────────────────────────────────────────────────────────

/// Typed result of one successful state execution.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "stage", content = "output", rename_all = "snake_case")]
pub enum StateOutput {
    Parsed(ParsedQuery),
    Contextualized(ContextualizedQuery),
    Retrieved(RetrievalResult),
    Gaps(GapReport),
    Reasoned(ReasoningResult),
    Checked(ComplianceOutcome),
    Responded(ResponseDraft),
}

impl StateOutput {
    /// One-line summary for the state history.
    pub fn summary(&self) -> String {
        match self {
            StateOutput::Parsed(p) => format!(
                "{} keywords, intent {:?}",
                p.keywords.len(),
                p.intent
            ),
            StateOutput::Contextualized(c) => format!("query coordinate {}", c.coordinate),
            StateOutput::Retrieved(r) => format!("{} candidate regulations", r.candidates.len()),
            StateOutput::Gaps(g) => format!(
                "severity {:.2}, {} uncovered keywords",
                g.severity,
                g.uncovered_keywords.len()
            ),
            StateOutput::Reasoned(r) => match r.consensus {
                Some(ref c) => format!(
                    "consensus of {} personas at {:.2} on {}",
                    c.contributor_count(),
                    c.confidence,
                    r.primary_id
                ),
                None => format!("no relevant persona for {}", r.primary_id),
            },
            StateOutput::Checked(c) => match c.verification {
                Some(ref v) => format!("verified at {:.2}", v.consensus_score),
                None => "nothing to verify".to_string(),
            },
            StateOutput::Responded(r) => format!("{} chars", r.text.chars().count()),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Workflow Context
// ─────────────────────────────────────────────────────────────────

/// One visit to a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateRecord {
    pub state: WorkflowState,
    pub timestamp: DateTime<Utc>,
    pub outcome: Outcome,
    pub summary: String,
}

/// Everything accumulated while one query walks the state machine.
///
/// Stage outputs are append-only per state; a retried state adds a new
/// entry and readers use the latest one.
#[derive(Debug)]
pub struct WorkflowContext {
    pub query_id: Uuid,
    pub request: QueryRequest,
    pub started_at: DateTime<Utc>,
    pub deadline: Instant,
    outputs: BTreeMap<WorkflowState, Vec<StateOutput>>,
    history: Vec<StateRecord>,
    failures: BTreeMap<WorkflowState, u32>,
}

macro_rules! latest_output {
    ($name:ident, $state:ident, $variant:ident, $ty:ty) => {
        pub fn $name(&self) -> Option<&$ty> {
            self.outputs
                .get(&WorkflowState::$state)?
                .iter()
                .rev()
                .find_map(|o| match o {
                    StateOutput::$variant(v) => Some(v),
                    _ => None,
                })
        }
    };
}

impl WorkflowContext {
    pub fn new(request: QueryRequest, deadline: Instant) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            request,
            started_at: Utc::now(),
            deadline,
            outputs: BTreeMap::new(),
            history: Vec::new(),
            failures: BTreeMap::new(),
        }
    }

    pub fn push_output(&mut self, state: WorkflowState, output: StateOutput) {
        self.outputs.entry(state).or_default().push(output);
    }

    pub fn record(&mut self, state: WorkflowState, outcome: Outcome, summary: impl Into<String>) {
        self.history.push(StateRecord {
            state,
            timestamp: Utc::now(),
            outcome,
            summary: summary.into(),
        });
    }

    /// Count a failure of `state`; returns the new total.
    pub fn increment_failures(&mut self, state: WorkflowState) -> u32 {
        let count = self.failures.entry(state).or_insert(0);
        *count += 1;
        *count
    }

    pub fn failures(&self, state: WorkflowState) -> u32 {
        self.failures.get(&state).copied().unwrap_or(0)
    }

    pub fn history(&self) -> &[StateRecord] {
        &self.history
    }

    pub fn outputs(&self, state: WorkflowState) -> &[StateOutput] {
        self.outputs.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    latest_output!(parsed, QueryParsing, Parsed, ParsedQuery);
    latest_output!(contextualized, Contextualization, Contextualized, ContextualizedQuery);
    latest_output!(retrieval, DataRetrieval, Retrieved, RetrievalResult);
    latest_output!(gaps, GapAnalysis, Gaps, GapReport);
    latest_output!(reasoning, ExpertReasoning, Reasoned, ReasoningResult);
    latest_output!(compliance, ComplianceCheck, Checked, ComplianceOutcome);
    latest_output!(response, ResponseGeneration, Responded, ResponseDraft);

    pub fn snapshot(&self) -> WorkflowSnapshot {
        WorkflowSnapshot {
            query_id: self.query_id,
            query: self.request.query.clone(),
            history: self.history.clone(),
            failures: self.failures.clone(),
            completed_states: self
                .outputs
                .iter()
                .filter(|(_, v)| !v.is_empty())
                .map(|(k, _)| *k)
                .collect(),
        }
    }
}

/// Partial context attached to fatal workflow errors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    pub query_id: Uuid,
    pub query: String,
    pub history: Vec<StateRecord>,
    pub failures: BTreeMap<WorkflowState, u32>,
    pub completed_states: Vec<WorkflowState>,
}

impl WorkflowSnapshot {
    /// "query_parsing -> contextualization -> data_retrieval(failed) ..."
    pub fn trail(&self) -> String {
        self.history
            .iter()
            .map(|r| match r.outcome {
                Outcome::Success => r.state.name().to_string(),
                Outcome::Failure => format!("{}(failed)", r.state.name()),
            })
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}
