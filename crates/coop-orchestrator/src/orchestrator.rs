//! Orchestrator - drives one run through the stage pipeline
//!
//! Stages run one after another against a single `OrchestrationState`. Stage
//! failures never abort the run: the error text is stored in the stage's field
//! and the judge scores the degradation. Which stage comes next is decided by
//! the pure functions in `state_machine`.

use crate::activity_logger::ActivityLogger;
use crate::approval::{ApprovalDecision, ApprovalGate, AutoApprove};
use crate::prompt;
use crate::state_machine::{ceiling_hit, next_stage, Stage, TransitionPolicy};
use coop_agent::Gateway;
use coop_core::{
    ChatMessage, CoopConfig, CoopError, Language, OrchestrationState, Result, Role,
};
use coop_judge::{should_halt, QualityJudge};
use coop_sandbox::{code_context, extract_code_block, Sandbox};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// How the code stage produces code, fixed at construction
#[derive(Clone)]
pub enum CodeStrategy {
    /// One programmer call, code taken from its reply
    Direct,
    /// Delegate to a sandbox
    Sandboxed(Arc<dyn Sandbox>),
}

impl CodeStrategy {
    fn sandbox(&self) -> Option<&Arc<dyn Sandbox>> {
        match self {
            CodeStrategy::Direct => None,
            CodeStrategy::Sandboxed(sandbox) => Some(sandbox),
        }
    }
}

/// Why a run reached OUTPUT
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    JudgeHalted,
    MaxIterations,
    CeilingReached,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::JudgeHalted => write!(f, "quality gate halted"),
            StopReason::MaxIterations => write!(f, "iteration budget exhausted"),
            StopReason::CeilingReached => write!(f, "stage execution ceiling reached"),
        }
    }
}

/// Text stored in a stage's field when its gateway call fails
pub fn stage_error(stage: Stage, err: &CoopError) -> String {
    if err.is_unavailable() {
        error!("{} unavailable: {}", stage.label(), err);
        format!(
            "ERROR: LLM {}. Pull it on the model gateway and run again.",
            err
        )
    } else {
        error!("Error in {}: {}", stage.label(), err);
        format!("Error in {}: {}", stage.label(), err)
    }
}

/// Cut `text` to `limit` characters and mark the cut
pub fn truncate_with_marker(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let head: String = text.chars().take(limit).collect();
    format!("{}\n... [truncated]", head)
}

pub struct Orchestrator {
    gateway: Arc<dyn Gateway>,
    judge: QualityJudge,
    config: CoopConfig,
    policy: TransitionPolicy,
    code: CodeStrategy,
    approval: Arc<dyn ApprovalGate>,
    activity: Option<ActivityLogger>,
}

impl Orchestrator {
    pub fn new(config: CoopConfig, gateway: Arc<dyn Gateway>) -> Self {
        let judge = QualityJudge::from_config(gateway.clone(), &config);
        let policy = TransitionPolicy::from_config(&config);
        Self {
            gateway,
            judge,
            config,
            policy,
            code: CodeStrategy::Direct,
            approval: Arc::new(AutoApprove),
            activity: None,
        }
    }

    /// Run the code and test stages in a sandbox
    pub fn with_sandbox(mut self, sandbox: Option<Arc<dyn Sandbox>>) -> Self {
        self.code = match sandbox {
            Some(sandbox) => CodeStrategy::Sandboxed(sandbox),
            None => CodeStrategy::Direct,
        };
        self
    }

    /// Reviewer used when human approval is enabled
    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    pub fn with_activity_logger(mut self, logger: ActivityLogger) -> Self {
        self.activity = Some(logger);
        self
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    fn language(&self) -> Language {
        self.config.workflow.language
    }

    /// Drive `state` from REQUIREMENTS to OUTPUT
    ///
    /// The state is updated in place so a caller still holds the partial
    /// result if the run fails.
    #[instrument(skip(self, state))]
    pub async fn run(&self, run_id: &str, state: &mut OrchestrationState) -> Result<StopReason> {
        info!(
            "Starting run: {}",
            state.input.lines().next().unwrap_or_default()
        );
        if let Some(logger) = &self.activity {
            logger
                .log_run_start(run_id, &state.input, self.policy.max_iterations)
                .await;
        }

        let mut stage = Stage::Requirements;
        while !stage.is_terminal() {
            if stage == Stage::Requirements {
                info!(
                    "=== Iteration {} of {} ===",
                    state.iteration_count + 1,
                    self.policy.max_iterations
                );
            }

            self.execute(stage, state).await?;
            state.stage_executions += 1;

            if let Some(logger) = &self.activity {
                if let Some(output) = stage_output(stage, state) {
                    logger
                        .log_stage(stage, state.iteration_count.max(1), output)
                        .await;
                }
            }

            let next = next_stage(stage, state, &self.policy);
            if next == Stage::Output && ceiling_hit(state, &self.policy) && !state.halted {
                warn!(
                    "Stage execution ceiling of {} reached, forcing output",
                    self.policy.stage_ceiling
                );
                state.ceiling_reached = true;
            }
            debug!("{} -> {}", stage, next);
            stage = next;
        }

        let reason = self.stop_reason(state);
        info!(
            "Run finished after {} iterations ({} stage executions): {}",
            state.iteration_count, state.stage_executions, reason
        );
        if let Some(logger) = &self.activity {
            logger.log_run_complete(state, &reason.to_string()).await;
        }
        Ok(reason)
    }

    fn stop_reason(&self, state: &OrchestrationState) -> StopReason {
        if state.ceiling_reached {
            return StopReason::CeilingReached;
        }
        let judged_halt = state.latest_record().is_some_and(|r| {
            should_halt(
                r.quality_score,
                r.change_magnitude,
                r.decision,
                self.judge.thresholds(),
            )
        });
        if judged_halt {
            StopReason::JudgeHalted
        } else {
            StopReason::MaxIterations
        }
    }

    /// Run one stage against the state
    pub async fn execute(&self, stage: Stage, state: &mut OrchestrationState) -> Result<()> {
        match stage {
            Stage::Requirements => {
                let user = prompt::requirements_prompt(state);
                state.snapshot.requirements = self.text_stage(stage, Role::ProductManager, user).await;
            }
            Stage::Design => {
                let user = prompt::design_prompt(state);
                state.snapshot.design = self.text_stage(stage, Role::Architect, user).await;
            }
            Stage::HumanApproval => self.human_approval(state).await?,
            Stage::Code => state.snapshot.code = self.code_stage(state).await,
            Stage::Test => state.snapshot.test_results = self.test_stage(state).await,
            Stage::Review => {
                let user = prompt::review_prompt(&state.snapshot);
                state.snapshot.review_feedback = self.text_stage(stage, Role::Reviewer, user).await;
            }
            Stage::QualityGate => self.quality_gate(state).await,
            Stage::Reflect => {
                let user = prompt::reflection_prompt(state);
                state.snapshot.strategic_guidance = self.text_stage(stage, Role::Reflector, user).await;
                info!("Reflection produced new strategic guidance");
            }
            Stage::Output => {}
        }
        Ok(())
    }

    async fn generate(&self, role: Role, user: String) -> Result<String> {
        let role_config = self.config.role_config(role);
        let messages = vec![
            ChatMessage::system(prompt::system_prompt(role, self.language())),
            ChatMessage::user(user),
        ];
        debug!("{} prompt: {} chars", role, messages[1].content.len());
        let reply = self.gateway.generate(&role_config, &messages).await?;
        debug!("{} replied with {} chars", role, reply.len());
        Ok(reply)
    }

    /// A prose stage: errors become field text, long replies are compressed
    async fn text_stage(&self, stage: Stage, role: Role, user: String) -> String {
        match self.generate(role, user).await {
            Ok(text) => self.compress(text).await,
            Err(e) => stage_error(stage, &e),
        }
    }

    /// Summarize oversized content with the distiller, truncating if that fails
    async fn compress(&self, text: String) -> String {
        let settings = &self.config.compression;
        if !settings.enabled || text.chars().count() <= settings.threshold {
            return text;
        }

        match self.generate(Role::Distiller, text.clone()).await {
            Ok(summary) if !summary.trim().is_empty() => {
                info!(
                    "Compressed {} chars to {} chars",
                    text.chars().count(),
                    summary.chars().count()
                );
                summary
            }
            Ok(_) => {
                warn!("Distiller returned nothing, truncating content");
                truncate_with_marker(&text, settings.threshold)
            }
            Err(e) => {
                warn!("Distiller failed ({}), truncating content", e);
                truncate_with_marker(&text, settings.threshold)
            }
        }
    }

    async fn human_approval(&self, state: &mut OrchestrationState) -> Result<()> {
        match self.approval.review(&state.snapshot).await? {
            ApprovalDecision::Approved => {
                info!("Design approved");
                state.approval_feedback = None;
            }
            ApprovalDecision::Rejected { feedback } => {
                info!("Design rejected, returning to design");
                state.approval_feedback = Some(feedback);
            }
        }
        Ok(())
    }

    async fn code_stage(&self, state: &OrchestrationState) -> String {
        match &self.code {
            CodeStrategy::Direct => {
                let user = code_context(&state.snapshot, self.language());
                match self.generate(Role::Programmer, user).await {
                    Ok(reply) => extract_code_block(&reply, self.language()),
                    Err(e) => stage_error(Stage::Code, &e),
                }
            }
            CodeStrategy::Sandboxed(sandbox) => {
                info!("Generating code in {}", sandbox.describe());
                match sandbox.run(&state.snapshot).await {
                    Ok(artifact) => {
                        if !artifact.complete {
                            warn!("Sandbox run ended without a deliverable");
                        }
                        debug!("Sandbox transcript:\n{}", artifact.transcript);
                        artifact.code
                    }
                    Err(e) => stage_error(Stage::Code, &e),
                }
            }
        }
    }

    async fn test_stage(&self, state: &OrchestrationState) -> String {
        let user = prompt::test_prompt(&state.snapshot, self.language());
        let tests = match self.generate(Role::Tester, user).await {
            Ok(reply) => extract_code_block(&reply, self.language()),
            Err(e) => return stage_error(Stage::Test, &e),
        };

        match self.code.sandbox() {
            Some(sandbox) => {
                let transcript = sandbox
                    .run_tests(&state.snapshot.code, &tests, self.language())
                    .await;
                format!(
                    "Generated Tests:\n{}\n\nTest Execution:\n{}",
                    tests, transcript
                )
            }
            None => {
                info!("Test execution skipped because sandbox is disabled");
                format!(
                    "Generated Tests:\n{}\n\nTest execution skipped: Sandbox is disabled.",
                    tests
                )
            }
        }
    }

    async fn quality_gate(&self, state: &mut OrchestrationState) {
        let index = state.iteration_count + 1;
        let previous = state.latest_record().map(|r| r.snapshot.clone());
        let mut record = self
            .judge
            .evaluate(&state.snapshot, previous.as_ref(), index)
            .await;

        state.iteration_count = index;
        if state.iteration_count >= self.policy.max_iterations && !record.should_halt {
            info!(
                "Iteration budget of {} reached, forcing halt",
                self.policy.max_iterations
            );
            record.should_halt = true;
        }

        if record.parse_mode.is_degraded() {
            state.degraded_judgments += 1;
            warn!(
                "Judge gave no usable signal on iteration {} ({:?}); {} degraded in a row",
                index, record.parse_mode, state.degraded_judgments
            );
        } else {
            state.degraded_judgments = 0;
        }

        state.halted = record.should_halt;
        if let Some(logger) = &self.activity {
            logger.log_judgment(&record).await;
        }
        state.iteration_log.push(record);
    }
}

/// The text a stage wrote, for the activity log
fn stage_output(stage: Stage, state: &OrchestrationState) -> Option<&str> {
    let snapshot = &state.snapshot;
    match stage {
        Stage::Requirements => Some(&snapshot.requirements),
        Stage::Design => Some(&snapshot.design),
        Stage::Code => Some(&snapshot.code),
        Stage::Test => Some(&snapshot.test_results),
        Stage::Review => Some(&snapshot.review_feedback),
        Stage::Reflect => Some(&snapshot.strategic_guidance),
        Stage::HumanApproval => state.approval_feedback.as_deref(),
        Stage::QualityGate | Stage::Output => None,
    }
}
