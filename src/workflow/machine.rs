//! The AoT state machine driver.
//!
//! Holds no per-query state: every call to [`WorkflowMachine::process_query`]
//! owns its own [`WorkflowContext`], so one machine serves any number of
//! concurrent queries.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};

use super::explanation::ExplanationNode;
use super::query::{QueryRequest, QueryResponse};
use super::stages::StageExecutor;
use super::state::{Outcome, TransitionTable, WorkflowContext, WorkflowState};
use crate::error::{Error, Result};

// ─────────────────────────────────────────────────────────────────
// Machine Settings
// ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct MachineSettings {
    /// Failures a single state may absorb before the query fails
    pub max_retries: u32,

    /// Wall-clock budget for one query
    pub timeout: Duration,
}

impl Default for MachineSettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            timeout: Duration::from_secs(30),
        }
    }
}

impl MachineSettings {
    /// Ceiling on state executions, and so on history length, per query.
    /// Trips on tables whose success edges loop and on failure patterns
    /// that keep bouncing between states without exhausting any one.
    pub fn step_budget(&self) -> usize {
        WorkflowState::ALL.len() * (self.max_retries as usize + 1)
    }
}

// ─────────────────────────────────────────────────────────────────
// Workflow Machine
// ─────────────────────────────────────────────────────────────────

pub struct WorkflowMachine<S> {
    stages: S,
    transitions: TransitionTable,
    settings: MachineSettings,
}

impl<S: StageExecutor> WorkflowMachine<S> {
    pub fn new(stages: S, transitions: TransitionTable, settings: MachineSettings) -> Self {
        Self {
            stages,
            transitions,
            settings,
        }
    }

    pub fn stages(&self) -> &S {
        &self.stages
    }

    pub fn transitions(&self) -> &TransitionTable {
        &self.transitions
    }

    pub fn settings(&self) -> &MachineSettings {
        &self.settings
    }

    /// Drive one query from parsing to completion.
    ///
    /// Malformed requests are rejected before any state runs. A state
    /// failure is routed to the table's failure target; once a state has
    /// failed more than `max_retries` times the query fails with a
    /// snapshot of what was accumulated. When the deadline passes after
    /// expert reasoning has produced a result, the machine goes straight
    /// to response generation and answers from that; before that point
    /// the query times out.
    pub async fn process_query(&self, request: QueryRequest) -> Result<QueryResponse> {
        request.validate()?;

        let deadline = Instant::now() + self.settings.timeout;
        let ctx = WorkflowContext::new(request, deadline);
        let span = info_span!("query", query_id = %ctx.query_id);

        self.run(ctx).instrument(span).await
    }

    async fn run(&self, mut ctx: WorkflowContext) -> Result<QueryResponse> {
        info!(query = %ctx.request.query, "Processing query");

        let mut state = WorkflowState::QueryParsing;
        let mut steps = 0usize;

        while !state.is_terminal() {
            if state != WorkflowState::ResponseGeneration && Instant::now() >= ctx.deadline {
                state = self.after_deadline(state, &ctx)?;
                continue;
            }

            steps += 1;
            if steps > self.settings.step_budget() {
                return Err(Error::WorkflowFailed {
                    state,
                    retries: ctx.failures(state),
                    message: format!("no completion after {} state executions", steps - 1),
                    snapshot: Some(Box::new(ctx.snapshot())),
                });
            }

            let result = match tokio::time::timeout_at(ctx.deadline, self.stages.execute(state, &ctx)).await {
                Ok(result) => result,
                Err(_) => {
                    state = self.after_deadline(state, &ctx)?;
                    continue;
                }
            };

            state = match result {
                Ok(output) => {
                    let summary = output.summary();
                    debug!(%state, %summary, "State succeeded");
                    ctx.push_output(state, output);
                    ctx.record(state, Outcome::Success, summary);
                    self.transitions.next(state, Outcome::Success)
                }
                Err(e) => {
                    ctx.record(state, Outcome::Failure, e.to_string());
                    let failures = ctx.increment_failures(state);
                    if failures > self.settings.max_retries {
                        warn!(%state, failures, error = %e, "State retries exhausted");
                        return Err(Error::WorkflowFailed {
                            state,
                            retries: failures - 1,
                            message: e.to_string(),
                            snapshot: Some(Box::new(ctx.snapshot())),
                        });
                    }
                    let next = self.transitions.next(state, Outcome::Failure);
                    warn!(%state, failures, next = %next, error = %e, "State failed");
                    next
                }
            };
        }

        let response = self.build_response(&ctx)?;
        info!(
            states = response.state_history.len(),
            confidence = response.confidence_score,
            "Query complete"
        );
        Ok(response)
    }

    /// Where to go once the deadline has passed in `state`.
    fn after_deadline(&self, state: WorkflowState, ctx: &WorkflowContext) -> Result<WorkflowState> {
        if state != WorkflowState::ResponseGeneration && ctx.reasoning().is_some() {
            warn!(%state, "Query deadline reached, answering from the reasoning gathered so far");
            return Ok(WorkflowState::ResponseGeneration);
        }
        warn!(%state, "Query deadline reached");
        Err(Error::WorkflowTimeout {
            state,
            timeout_secs: self.settings.timeout.as_secs(),
            snapshot: Some(Box::new(ctx.snapshot())),
        })
    }

    fn build_response(&self, ctx: &WorkflowContext) -> Result<QueryResponse> {
        let draft = ctx
            .response()
            .ok_or_else(|| Error::Internal("workflow completed without a response".to_string()))?;

        let consensus = ctx.reasoning().and_then(|r| r.consensus.as_ref());
        let compliance = ctx.compliance();
        let explanation_tree = ExplanationNode::from_context(ctx);

        Ok(QueryResponse {
            query_id: ctx.query_id,
            response_text: draft.text.clone(),
            confidence_score: explanation_tree.overall_confidence(),
            explanation_tree,
            persona_contributions: consensus.map(|c| c.contributions.clone()).unwrap_or_default(),
            related_regulations: draft.related_regulations.clone(),
            validation: consensus.and_then(|c| c.validation.clone()),
            verification: compliance.and_then(|c| c.verification.clone()),
            compliance: compliance.and_then(|c| c.entity.clone()),
            state_history: ctx.history().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::stages::{ReasoningResult, ResponseDraft, StageExecutor};
    use crate::workflow::state::StateOutput;
    use async_trait::async_trait;

    /// Succeeds at everything except the states listed as failing.
    struct Scripted {
        failing: Vec<WorkflowState>,
        stall: Option<WorkflowState>,
    }

    #[async_trait]
    impl StageExecutor for Scripted {
        async fn execute(&self, state: WorkflowState, _ctx: &WorkflowContext) -> Result<StateOutput> {
            if self.stall == Some(state) {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            if self.failing.contains(&state) {
                return Err(Error::processing(format!("{} is broken", state)));
            }
            Ok(StateOutput::Responded(ResponseDraft {
                text: format!("after {}", state),
                related_regulations: vec![],
            }))
        }
    }

    fn machine(failing: Vec<WorkflowState>) -> WorkflowMachine<Scripted> {
        WorkflowMachine::new(
            Scripted { failing, stall: None },
            TransitionTable::default(),
            MachineSettings::default(),
        )
    }

    #[tokio::test]
    async fn test_happy_path_visits_each_state_once() {
        let response = machine(vec![]).process_query(QueryRequest::new("q")).await.unwrap();
        let visited: Vec<WorkflowState> = response.state_history.iter().map(|r| r.state).collect();
        assert_eq!(visited, WorkflowState::ACTIVE.to_vec());
    }

    #[tokio::test]
    async fn test_invalid_request_runs_no_state() {
        let err = machine(vec![])
            .process_query(QueryRequest::new(""))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidQuery { .. }));
        assert!(err.snapshot().is_none());
    }

    #[tokio::test]
    async fn test_persistent_failure_is_fatal_after_retries() {
        let err = machine(vec![WorkflowState::GapAnalysis])
            .process_query(QueryRequest::new("q"))
            .await
            .unwrap_err();

        match err {
            Error::WorkflowFailed { state, retries, snapshot, .. } => {
                assert_eq!(state, WorkflowState::GapAnalysis);
                assert_eq!(retries, 3);
                let snapshot = snapshot.unwrap();
                assert_eq!(snapshot.failures[&WorkflowState::GapAnalysis], 4);
                assert!(snapshot.trail().contains("gap_analysis(failed)"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_deadline_is_fatal() {
        let m = WorkflowMachine::new(
            Scripted {
                failing: vec![],
                stall: Some(WorkflowState::DataRetrieval),
            },
            TransitionTable::default(),
            MachineSettings {
                max_retries: 3,
                timeout: Duration::from_millis(200),
            },
        );
        let err = m.process_query(QueryRequest::new("q")).await.unwrap_err();
        match err {
            Error::WorkflowTimeout { state, snapshot, .. } => {
                assert_eq!(state, WorkflowState::DataRetrieval);
                assert_eq!(snapshot.unwrap().history.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    /// Reasons quickly, then stalls in the compliance review.
    struct SlowReview;

    #[async_trait]
    impl StageExecutor for SlowReview {
        async fn execute(&self, state: WorkflowState, _ctx: &WorkflowContext) -> Result<StateOutput> {
            match state {
                WorkflowState::ExpertReasoning => Ok(StateOutput::Reasoned(ReasoningResult {
                    primary_id: "reg-1".to_string(),
                    related: vec![],
                    consensus: None,
                    confidence: 0.5,
                    persona_context: Default::default(),
                    notes: Default::default(),
                })),
                WorkflowState::ComplianceCheck => {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Err(Error::processing("review never finishes"))
                }
                _ => Ok(StateOutput::Responded(ResponseDraft {
                    text: format!("after {}", state),
                    related_regulations: vec![],
                })),
            }
        }
    }

    #[tokio::test]
    async fn test_deadline_after_reasoning_still_answers() {
        let m = WorkflowMachine::new(
            SlowReview,
            TransitionTable::default(),
            MachineSettings {
                max_retries: 3,
                timeout: Duration::from_millis(200),
            },
        );
        let response = m.process_query(QueryRequest::new("q")).await.unwrap();
        let visited: Vec<WorkflowState> = response.state_history.iter().map(|r| r.state).collect();

        assert_eq!(visited.last(), Some(&WorkflowState::ResponseGeneration));
        assert!(visited.contains(&WorkflowState::ExpertReasoning));
        assert!(!visited.contains(&WorkflowState::ComplianceCheck));
        assert_eq!(response.response_text, "after response_generation");
    }

    #[tokio::test]
    async fn test_looping_table_hits_step_budget() {
        let mut rules = TransitionTable::default().to_rules();
        rules.get_mut("response_generation").unwrap().success = "query_parsing".to_string();
        let m = WorkflowMachine::new(
            Scripted { failing: vec![], stall: None },
            TransitionTable::from_rules(&rules).unwrap(),
            MachineSettings::default(),
        );
        let err = m.process_query(QueryRequest::new("q")).await.unwrap_err();
        assert!(matches!(err, Error::WorkflowFailed { .. }));
    }
}
