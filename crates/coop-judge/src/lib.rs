//! # coop-judge
//!
//! Halt/continue decisions for Coop.
//!
//! The judge asks the quality-gate role to score the current deliverables
//! against the previous iteration, then recovers the scores from whatever the
//! model returned. Parsing is total and a failed call degrades to CONTINUE, so
//! the orchestrator always gets a record.

mod judge;
mod parse;

pub use judge::{should_halt, JudgeThresholds, QualityJudge};
pub use parse::{
    normalize_score, parse_assessment, Assessment, DEFAULT_CHANGE, DEFAULT_QUALITY,
    FALLBACK_REASONING,
};
