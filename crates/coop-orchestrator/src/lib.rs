//! # coop-orchestrator
//!
//! Workflow engine for Coop.
//!
//! This crate provides:
//! - The stage state machine and its branch rules (halt, continue, reflect)
//! - The orchestrator that runs each stage against the model gateway
//! - Human approval gates
//! - Activity logs, deliverables and run records
//! - `RunService`, which wraps runs with ids, persistence and failure capture

mod activity_logger;
mod approval;
mod deliverables;
mod orchestrator;
mod prompt;
mod run_store;
mod service;
mod state_machine;

pub use activity_logger::ActivityLogger;
pub use approval::{ApprovalDecision, ApprovalGate, AutoApprove, ConsoleApproval};
pub use deliverables::DeliverableWriter;
pub use orchestrator::{stage_error, truncate_with_marker, CodeStrategy, Orchestrator, StopReason};
pub use prompt::{
    design_prompt, reflection_prompt, requirements_prompt, review_prompt, system_prompt,
    test_prompt,
};
pub use run_store::{JsonlRunStore, RunRecord, RunStatus, RunStore};
pub use service::{new_run_id, RunService, RunSummary};
pub use state_machine::{
    ceiling_hit, decide_branch, is_stagnating, next_stage, Branch, Stage, TransitionPolicy,
};
