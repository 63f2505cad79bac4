//! Quality judge: one gateway call per cycle, reduced to an `IterationRecord`

use crate::parse::{parse_assessment, Assessment};
use chrono::Utc;
use coop_agent::{batch_generate, BatchRequest, Gateway};
use coop_core::{
    ChatMessage, CoopConfig, Decision, IterationRecord, ParseMode, RoleConfig, Snapshot,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Halt thresholds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JudgeThresholds {
    /// Minimum quality for a HALT decision to be honoured
    pub quality_threshold: f64,
    /// At or below this change magnitude the run has converged
    pub change_threshold: f64,
}

impl JudgeThresholds {
    pub fn from_config(config: &CoopConfig) -> Self {
        Self {
            quality_threshold: config.workflow.quality_threshold,
            change_threshold: config.workflow.change_threshold,
        }
    }
}

impl Default for JudgeThresholds {
    fn default() -> Self {
        Self::from_config(&CoopConfig::default())
    }
}

/// `(quality >= q AND decision == HALT) OR change <= c`
pub fn should_halt(
    quality_score: f64,
    change_magnitude: f64,
    decision: Decision,
    thresholds: JudgeThresholds,
) -> bool {
    (quality_score >= thresholds.quality_threshold && decision == Decision::Halt)
        || change_magnitude <= thresholds.change_threshold
}

const JUDGE_INSTRUCTIONS: &str = r#"You are the quality gate of a software delivery team.
Assess the CURRENT deliverables against the original request and compare them with the PREVIOUS deliverables.

Respond with a single fenced JSON block:

```json
{
  "quality_score": <0.0-1.0, overall quality of the current deliverables>,
  "change_magnitude": <0.0-1.0, how much changed since the previous iteration>,
  "confidence": <0.0-1.0, how sure you are>,
  "decision": "HALT" or "CONTINUE",
  "reasoning": "<one paragraph>"
}
```

Choose HALT only when the deliverables are complete and correct."#;

/// Judge bound to a gateway and the quality-gate role
pub struct QualityJudge {
    gateway: Arc<dyn Gateway>,
    role: RoleConfig,
    thresholds: JudgeThresholds,
    batch_concurrency: usize,
}

impl QualityJudge {
    pub fn new(gateway: Arc<dyn Gateway>, role: RoleConfig, thresholds: JudgeThresholds) -> Self {
        Self {
            gateway,
            role,
            thresholds,
            batch_concurrency: 4,
        }
    }

    pub fn from_config(gateway: Arc<dyn Gateway>, config: &CoopConfig) -> Self {
        Self::new(
            gateway,
            config.role_config(coop_core::Role::QualityGate),
            JudgeThresholds::from_config(config),
        )
        .with_batch_concurrency(config.gateway.batch_concurrency)
    }

    pub fn with_batch_concurrency(mut self, concurrency: usize) -> Self {
        self.batch_concurrency = concurrency.max(1);
        self
    }

    pub fn thresholds(&self) -> JudgeThresholds {
        self.thresholds
    }

    /// Build the judge conversation for one snapshot pair
    pub fn build_messages(current: &Snapshot, previous: Option<&Snapshot>) -> Vec<ChatMessage> {
        let previous_text = previous
            .map(|p| p.render())
            .unwrap_or_else(|| "(no previous iteration)".to_string());

        vec![
            ChatMessage::system(JUDGE_INSTRUCTIONS),
            ChatMessage::user(format!(
                "# CURRENT DELIVERABLES\n\n{}\n# PREVIOUS DELIVERABLES\n\n{}",
                current.render(),
                previous_text
            )),
        ]
    }

    /// Evaluate one cycle. Never fails: a failed judge call becomes a
    /// CONTINUE record with `should_halt = false`.
    pub async fn evaluate(
        &self,
        current: &Snapshot,
        previous: Option<&Snapshot>,
        iteration_index: usize,
    ) -> IterationRecord {
        let messages = Self::build_messages(current, previous);
        let response = self.gateway.generate(&self.role, &messages).await;
        self.record_from_response(response, current, previous, iteration_index)
    }

    /// Score several candidate snapshots concurrently against one baseline
    ///
    /// A failed call only affects its own record.
    pub async fn score_candidates(
        &self,
        candidates: &[Snapshot],
        previous: Option<&Snapshot>,
        iteration_index: usize,
    ) -> Vec<IterationRecord> {
        let requests: Vec<BatchRequest> = candidates
            .iter()
            .map(|c| BatchRequest {
                role: self.role.clone(),
                messages: Self::build_messages(c, previous),
            })
            .collect();

        let responses =
            batch_generate(self.gateway.as_ref(), &requests, self.batch_concurrency).await;

        responses
            .into_iter()
            .zip(candidates)
            .map(|(response, candidate)| {
                self.record_from_response(response, candidate, previous, iteration_index)
            })
            .collect()
    }

    fn record_from_response(
        &self,
        response: coop_core::Result<String>,
        current: &Snapshot,
        previous: Option<&Snapshot>,
        iteration_index: usize,
    ) -> IterationRecord {
        match response {
            Ok(text) => {
                debug!("Judge raw response: {}", text);
                let assessment = parse_assessment(&text);
                if assessment.mode == ParseMode::Fallback {
                    warn!(
                        "Judge output for iteration {} was unparsable, using defaults",
                        iteration_index
                    );
                }
                self.record_from_assessment(assessment, current, previous, iteration_index)
            }
            Err(e) => {
                error!("Quality judge call failed on iteration {}: {}", iteration_index, e);
                IterationRecord {
                    iteration_index,
                    quality_score: 0.0,
                    change_magnitude: 1.0,
                    confidence: 0.0,
                    decision: Decision::Continue,
                    should_halt: false,
                    reasoning: format!("Error in evaluation: {}", e),
                    parse_mode: ParseMode::CallFailed,
                    snapshot: current.clone(),
                    evaluated_at: Utc::now(),
                }
            }
        }
    }

    fn record_from_assessment(
        &self,
        assessment: Assessment,
        current: &Snapshot,
        previous: Option<&Snapshot>,
        iteration_index: usize,
    ) -> IterationRecord {
        let mut change_magnitude = assessment.change_magnitude;
        let unchanged = previous.is_some_and(|p| p.digest() == current.digest());
        if unchanged {
            debug!("Snapshot unchanged since previous iteration, forcing change to 0");
            change_magnitude = 0.0;
        }

        let halt = should_halt(
            assessment.quality_score,
            change_magnitude,
            assessment.decision,
            self.thresholds,
        );

        info!(
            "Judge: quality={:.2} change={:.2} decision={} halt={}",
            assessment.quality_score, change_magnitude, assessment.decision, halt
        );

        IterationRecord {
            iteration_index,
            quality_score: assessment.quality_score,
            change_magnitude,
            confidence: assessment.confidence,
            decision: assessment.decision,
            should_halt: halt,
            reasoning: assessment.reasoning,
            parse_mode: assessment.mode,
            snapshot: current.clone(),
            evaluated_at: Utc::now(),
        }
    }
}
