//! Prompt builders for each stage
//!
//! Each builder turns the run state into the user message for one role.
//! System prompts are short role descriptions; wording is not load-bearing.

use coop_core::{Language, OrchestrationState, Role, Snapshot};

/// Characters of each snapshot field shown to the reflector
const REFLECTION_FIELD_PREVIEW: usize = 500;

pub fn system_prompt(role: Role, language: Language) -> String {
    match role {
        Role::ProductManager => "You are a product manager. Turn the request into clear, \
             numbered functional requirements with acceptance criteria."
            .to_string(),
        Role::Architect => "You are a software architect. Produce a concise design: \
             modules, data structures, function signatures and error handling."
            .to_string(),
        Role::Programmer => format!(
            "You are a programmer. Write complete, runnable {} code for the design. \
             Reply with the code in a single fenced block.",
            language
        ),
        Role::Tester => format!(
            "You are a test engineer. Write {} tests for the code below. \
             Import from main and reply with the tests in a single fenced block.",
            language
        ),
        Role::Reviewer => "You are a code reviewer. List concrete defects, missing requirements \
             and improvements, most important first."
            .to_string(),
        Role::QualityGate => "You are the quality gate of a software delivery team.".to_string(),
        Role::Reflector => "You are a delivery coach. The team is not making progress. \
             Study the history and give short strategic guidance for the next iteration."
            .to_string(),
        Role::Distiller => "Summarize the text below. Keep every requirement, interface, \
             defect and number; drop repetition."
            .to_string(),
    }
}

fn push_section(prompt: &mut String, title: &str, body: &str) {
    if body.trim().is_empty() {
        return;
    }
    prompt.push_str(&format!("## {}\n\n{}\n\n", title, body.trim_end()));
}

pub fn requirements_prompt(state: &OrchestrationState) -> String {
    let mut prompt = String::new();
    push_section(&mut prompt, "REQUEST", &state.input);
    push_section(&mut prompt, "PREVIOUS REQUIREMENTS", &state.snapshot.requirements);
    push_section(&mut prompt, "REVIEW FEEDBACK", &state.snapshot.review_feedback);
    push_section(&mut prompt, "STRATEGIC GUIDANCE", &state.snapshot.strategic_guidance);
    prompt
}

pub fn design_prompt(state: &OrchestrationState) -> String {
    let mut prompt = String::new();
    push_section(&mut prompt, "REQUEST", &state.input);
    push_section(&mut prompt, "REQUIREMENTS", &state.snapshot.requirements);
    push_section(&mut prompt, "PREVIOUS DESIGN", &state.snapshot.design);
    push_section(&mut prompt, "STRATEGIC GUIDANCE", &state.snapshot.strategic_guidance);
    if let Some(feedback) = &state.approval_feedback {
        push_section(&mut prompt, "REVIEWER REJECTED THE LAST DESIGN", feedback);
    }
    prompt
}

pub fn test_prompt(snapshot: &Snapshot, language: Language) -> String {
    let mut prompt = format!("Target language: {}\n\n", language);
    push_section(&mut prompt, "REQUIREMENTS", &snapshot.requirements);
    push_section(&mut prompt, "CODE", &snapshot.code);
    prompt
}

pub fn review_prompt(snapshot: &Snapshot) -> String {
    let mut prompt = String::new();
    push_section(&mut prompt, "REQUIREMENTS", &snapshot.requirements);
    push_section(&mut prompt, "DESIGN", &snapshot.design);
    push_section(&mut prompt, "CODE", &snapshot.code);
    push_section(&mut prompt, "TEST RESULTS", &snapshot.test_results);
    prompt
}

/// History of every judged iteration plus a preview of the current snapshot
pub fn reflection_prompt(state: &OrchestrationState) -> String {
    let mut prompt = String::from("## ITERATION HISTORY\n\n");
    for record in &state.iteration_log {
        prompt.push_str(&format!(
            "- Iteration {}: quality {:.2}, change {:.2}, decision {}. {}\n",
            record.iteration_index,
            record.quality_score,
            record.change_magnitude,
            record.decision,
            record.reasoning.lines().next().unwrap_or("")
        ));
    }
    prompt.push('\n');

    prompt.push_str("## CURRENT STATE\n\n");
    let fields = [
        ("requirements", &state.snapshot.requirements),
        ("design", &state.snapshot.design),
        ("code", &state.snapshot.code),
        ("test_results", &state.snapshot.test_results),
        ("review_feedback", &state.snapshot.review_feedback),
    ];
    for (name, value) in fields {
        if value.chars().count() > REFLECTION_FIELD_PREVIEW {
            let head: String = value.chars().take(REFLECTION_FIELD_PREVIEW).collect();
            prompt.push_str(&format!("{}: {}... (truncated)\n", name, head));
        } else {
            prompt.push_str(&format!("{}: {}\n", name, value));
        }
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use coop_core::{Decision, IterationRecord, ParseMode};

    #[test]
    fn test_design_prompt_includes_rejection_notes() {
        let mut state = OrchestrationState::new("todo app");
        state.snapshot.requirements = "1. add items".to_string();
        assert!(!design_prompt(&state).contains("REJECTED"));

        state.approval_feedback = Some("needs persistence".to_string());
        let prompt = design_prompt(&state);
        assert!(prompt.contains("## REVIEWER REJECTED THE LAST DESIGN\n\nneeds persistence"));
        assert!(prompt.contains("1. add items"));
    }

    #[test]
    fn test_empty_sections_skipped() {
        let state = OrchestrationState::new("todo app");
        assert_eq!(requirements_prompt(&state), "## REQUEST\n\ntodo app\n\n");
    }

    #[test]
    fn test_reflection_prompt_lists_history() {
        let mut state = OrchestrationState::new("x");
        state.snapshot.code = "y".repeat(600);
        state.iteration_log.push(IterationRecord {
            iteration_index: 1,
            quality_score: 0.5,
            change_magnitude: 0.4,
            confidence: 0.9,
            decision: Decision::Continue,
            should_halt: false,
            reasoning: "missing tests\nmore".to_string(),
            parse_mode: ParseMode::Structured,
            snapshot: Snapshot::default(),
            evaluated_at: Utc::now(),
        });

        let prompt = reflection_prompt(&state);
        assert!(prompt.contains("- Iteration 1: quality 0.50, change 0.40, decision CONTINUE. missing tests\n"));
        assert!(prompt.contains("... (truncated)"));
    }
}
