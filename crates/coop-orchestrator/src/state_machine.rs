//! Pure stage transitions for a workflow run
//!
//! No async and no I/O: given the stage that just ran and the run state, decide
//! where the run goes next. Every transition is deterministic and testable.
//!
//! ```text
//! Requirements -> Design -> [HumanApproval] -> Code -> Test -> Review -> QualityGate
//!                   ^             | rejected                                 |
//!                   +-------------+           halt -> Output                 |
//!                                             reflect -> Reflect -> Requirements
//!                                             continue -> Requirements
//! ```

use coop_core::{CoopConfig, OrchestrationState};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Requirements,
    Design,
    HumanApproval,
    Code,
    Test,
    Review,
    QualityGate,
    Reflect,
    /// Terminal
    Output,
}

impl Stage {
    /// Name used in stage error strings, e.g. `Error in system design: ...`
    pub fn label(&self) -> &'static str {
        match self {
            Stage::Requirements => "requirements analysis",
            Stage::Design => "system design",
            Stage::HumanApproval => "human approval",
            Stage::Code => "code generation",
            Stage::Test => "testing",
            Stage::Review => "review",
            Stage::QualityGate => "quality gate",
            Stage::Reflect => "reflection",
            Stage::Output => "output",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Output)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Requirements => "REQUIREMENTS",
            Stage::Design => "DESIGN",
            Stage::HumanApproval => "HUMAN_APPROVAL",
            Stage::Code => "CODE",
            Stage::Test => "TEST",
            Stage::Review => "REVIEW",
            Stage::QualityGate => "QUALITY_GATE",
            Stage::Reflect => "REFLECT",
            Stage::Output => "OUTPUT",
        };
        write!(f, "{}", name)
    }
}

/// Where a run goes after the quality gate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Branch {
    Halt,
    Continue,
    Reflect,
}

/// Knobs the transition function reads
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransitionPolicy {
    pub human_approval: bool,
    pub max_iterations: usize,
    /// Number of recent records inspected for stagnation
    pub stagnation_window: usize,
    /// Minimum quality gain across the window
    pub change_threshold: f64,
    /// Hard cap on stage executions
    pub stage_ceiling: usize,
}

impl TransitionPolicy {
    pub fn from_config(config: &CoopConfig) -> Self {
        Self {
            human_approval: config.workflow.enable_human_approval,
            max_iterations: config.workflow.max_iterations,
            stagnation_window: config.workflow.stagnation_window,
            change_threshold: config.workflow.change_threshold,
            stage_ceiling: config.stage_ceiling(),
        }
    }
}

impl Default for TransitionPolicy {
    fn default() -> Self {
        Self::from_config(&CoopConfig::default())
    }
}

/// True once the run has used up its stage executions
pub fn ceiling_hit(state: &OrchestrationState, policy: &TransitionPolicy) -> bool {
    state.stage_executions >= policy.stage_ceiling
}

/// Quality gain over the last `window` scores is below `threshold`
///
/// Needs a full window of at least two scores.
pub fn is_stagnating(scores: &[f64], window: usize, threshold: f64) -> bool {
    if window < 2 || scores.len() < window {
        return false;
    }
    let recent = &scores[scores.len() - window..];
    recent[window - 1] - recent[0] < threshold
}

/// Branch policy after the quality gate
pub fn decide_branch(state: &OrchestrationState, policy: &TransitionPolicy) -> Branch {
    if state.halted {
        return Branch::Halt;
    }
    if state.iteration_count >= policy.max_iterations {
        return Branch::Halt;
    }
    if is_stagnating(
        &state.quality_scores(),
        policy.stagnation_window,
        policy.change_threshold,
    ) {
        return Branch::Reflect;
    }
    Branch::Continue
}

/// The stage that follows `current`
pub fn next_stage(current: Stage, state: &OrchestrationState, policy: &TransitionPolicy) -> Stage {
    if current.is_terminal() || ceiling_hit(state, policy) {
        return Stage::Output;
    }

    match current {
        Stage::Requirements => Stage::Design,
        Stage::Design if policy.human_approval => Stage::HumanApproval,
        Stage::Design => Stage::Code,
        Stage::HumanApproval if state.approval_feedback.is_some() => Stage::Design,
        Stage::HumanApproval => Stage::Code,
        Stage::Code => Stage::Test,
        Stage::Test => Stage::Review,
        Stage::Review => Stage::QualityGate,
        Stage::QualityGate => match decide_branch(state, policy) {
            Branch::Halt => Stage::Output,
            Branch::Reflect => Stage::Reflect,
            Branch::Continue => Stage::Requirements,
        },
        Stage::Reflect => Stage::Requirements,
        Stage::Output => Stage::Output,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coop_core::{Decision, IterationRecord, ParseMode, Snapshot};

    fn policy() -> TransitionPolicy {
        TransitionPolicy {
            human_approval: false,
            max_iterations: 10,
            stagnation_window: 3,
            change_threshold: 0.1,
            stage_ceiling: 100,
        }
    }

    fn record(index: usize, quality: f64) -> IterationRecord {
        IterationRecord {
            iteration_index: index,
            quality_score: quality,
            change_magnitude: 0.5,
            confidence: 0.9,
            decision: Decision::Continue,
            should_halt: false,
            reasoning: String::new(),
            parse_mode: ParseMode::Structured,
            snapshot: Snapshot::default(),
            evaluated_at: Utc::now(),
        }
    }

    fn state_with_scores(scores: &[f64]) -> OrchestrationState {
        let mut state = OrchestrationState::new("build a calculator");
        for (i, q) in scores.iter().enumerate() {
            state.iteration_log.push(record(i + 1, *q));
        }
        state.iteration_count = scores.len();
        state
    }

    #[test]
    fn test_linear_pipeline() {
        let state = OrchestrationState::new("x");
        let p = policy();
        let mut stage = Stage::Requirements;
        let mut seen = vec![stage];
        while stage != Stage::QualityGate {
            stage = next_stage(stage, &state, &p);
            seen.push(stage);
        }
        assert_eq!(
            seen,
            vec![
                Stage::Requirements,
                Stage::Design,
                Stage::Code,
                Stage::Test,
                Stage::Review,
                Stage::QualityGate
            ]
        );
    }

    #[test]
    fn test_human_approval_gate() {
        let mut p = policy();
        p.human_approval = true;
        let mut state = OrchestrationState::new("x");

        assert_eq!(next_stage(Stage::Design, &state, &p), Stage::HumanApproval);
        assert_eq!(next_stage(Stage::HumanApproval, &state, &p), Stage::Code);

        state.approval_feedback = Some("split the parser out".to_string());
        assert_eq!(next_stage(Stage::HumanApproval, &state, &p), Stage::Design);
    }

    #[test]
    fn test_stagnation_routes_to_reflect() {
        let state = state_with_scores(&[0.50, 0.51, 0.52]);
        assert_eq!(decide_branch(&state, &policy()), Branch::Reflect);
        assert_eq!(next_stage(Stage::QualityGate, &state, &policy()), Stage::Reflect);
        assert_eq!(next_stage(Stage::Reflect, &state, &policy()), Stage::Requirements);
    }

    #[test]
    fn test_improving_scores_continue() {
        let state = state_with_scores(&[0.3, 0.45, 0.6]);
        assert_eq!(decide_branch(&state, &policy()), Branch::Continue);
        assert_eq!(
            next_stage(Stage::QualityGate, &state, &policy()),
            Stage::Requirements
        );
    }

    #[test]
    fn test_partial_window_never_stagnates() {
        let state = state_with_scores(&[0.5, 0.5]);
        assert_eq!(decide_branch(&state, &policy()), Branch::Continue);
    }

    #[test]
    fn test_only_last_window_counts() {
        // Big early jump, flat tail
        let state = state_with_scores(&[0.1, 0.7, 0.71, 0.72]);
        assert_eq!(decide_branch(&state, &policy()), Branch::Reflect);
    }

    #[test]
    fn test_judge_halt_wins() {
        let mut state = state_with_scores(&[0.50, 0.51, 0.52]);
        state.halted = true;
        assert_eq!(decide_branch(&state, &policy()), Branch::Halt);
        assert_eq!(next_stage(Stage::QualityGate, &state, &policy()), Stage::Output);
    }

    #[test]
    fn test_iteration_budget_forces_halt() {
        let mut p = policy();
        p.max_iterations = 2;
        let state = state_with_scores(&[0.1, 0.9]);
        assert_eq!(decide_branch(&state, &p), Branch::Halt);
    }

    #[test]
    fn test_ceiling_forces_output_from_any_stage() {
        let mut p = policy();
        p.stage_ceiling = 5;
        let mut state = OrchestrationState::new("x");
        state.stage_executions = 5;

        for stage in [Stage::Requirements, Stage::Design, Stage::Code, Stage::Reflect] {
            assert_eq!(next_stage(stage, &state, &p), Stage::Output);
        }
        assert!(ceiling_hit(&state, &p));
    }

    #[test]
    fn test_output_is_terminal() {
        let state = OrchestrationState::new("x");
        assert_eq!(next_stage(Stage::Output, &state, &policy()), Stage::Output);
        assert!(Stage::Output.is_terminal());
    }

    #[test]
    fn test_is_stagnating_edges() {
        assert!(!is_stagnating(&[], 3, 0.1));
        assert!(!is_stagnating(&[0.5], 1, 0.1));
        assert!(is_stagnating(&[0.5, 0.5], 2, 0.1));
        // Exactly the threshold is progress
        assert!(!is_stagnating(&[0.5, 0.75], 2, 0.25));
        // A drop counts as stagnation
        assert!(is_stagnating(&[0.8, 0.6, 0.4], 3, 0.1));
    }

    #[test]
    fn test_labels_and_display() {
        assert_eq!(Stage::Design.label(), "system design");
        assert_eq!(Stage::QualityGate.to_string(), "QUALITY_GATE");
    }
}
