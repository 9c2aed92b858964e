//! The Algorithm of Thought workflow.
//!
//! A query walks a fixed set of states (parse, contextualize, retrieve,
//! gap analysis, expert reasoning, compliance check, response) under a
//! configurable transition table. [`WorkflowMachine`] drives the walk,
//! [`StageExecutor`] implementations do the work of each state.

pub mod explanation;
pub mod machine;
pub mod query;
pub mod stages;
pub mod state;

pub use explanation::ExplanationNode;
pub use machine::{MachineSettings, WorkflowMachine};
pub use query::{
    format_for_expertise, ExpertiseTier, QueryRequest, QueryResponse, RelatedRegulation,
    UserContext,
};
pub use stages::{RegulatoryStages, StageExecutor, StageSettings};
pub use state::{
    Outcome, StateOutput, StateRecord, TransitionRule, TransitionTable, WorkflowContext,
    WorkflowSnapshot, WorkflowState,
};

/// The production workflow over the regulatory stages.
pub type RegulatoryWorkflow = WorkflowMachine<RegulatoryStages>;
