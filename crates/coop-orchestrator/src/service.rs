//! Run service - the outermost boundary around orchestrator runs
//!
//! Gives each run an id, persists its record at start and at its terminal
//! state, writes deliverables, and turns any run-level error into a `Failed`
//! record while still flushing whatever the run produced.

use crate::activity_logger::ActivityLogger;
use crate::approval::{ApprovalGate, AutoApprove};
use crate::deliverables::DeliverableWriter;
use crate::orchestrator::{Orchestrator, StopReason};
use crate::run_store::{JsonlRunStore, RunRecord, RunStatus, RunStore};
use coop_agent::Gateway;
use coop_core::fail_open::fail_open;
use coop_core::{CoopConfig, OrchestrationState, Result};
use coop_sandbox::build_sandbox;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};
use uuid::Uuid;

/// What a finished run looks like to the caller
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: String,
    pub status: RunStatus,
    pub stop_reason: Option<StopReason>,
    pub state: OrchestrationState,
    pub output_location: Option<PathBuf>,
    pub error: Option<String>,
}

pub struct RunService {
    config: CoopConfig,
    gateway: Arc<dyn Gateway>,
    store: Arc<dyn RunStore>,
    deliverables: DeliverableWriter,
    approval: Arc<dyn ApprovalGate>,
    activity_root: Option<PathBuf>,
}

pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

impl RunService {
    pub fn new(config: CoopConfig, gateway: Arc<dyn Gateway>) -> Self {
        let store = Arc::new(JsonlRunStore::new(config.paths.runs.clone()));
        let deliverables =
            DeliverableWriter::new(config.paths.deliverables.clone(), config.workflow.language);
        let activity_root = Some(config.paths.activity.clone());
        Self {
            config,
            gateway,
            store,
            deliverables,
            approval: Arc::new(AutoApprove),
            activity_root,
        }
    }

    pub fn with_store(mut self, store: Arc<dyn RunStore>) -> Self {
        self.store = store;
        self
    }

    pub fn with_approval(mut self, approval: Arc<dyn ApprovalGate>) -> Self {
        self.approval = approval;
        self
    }

    pub fn without_activity_log(mut self) -> Self {
        self.activity_root = None;
        self
    }

    pub fn store(&self) -> &Arc<dyn RunStore> {
        &self.store
    }

    /// Run one request under a fresh id
    pub async fn start(&self, input: &str) -> RunSummary {
        self.run_with_id(&new_run_id(), input).await
    }

    /// Run one request. Never fails: errors end up in the summary and the run record.
    pub async fn run_with_id(&self, run_id: &str, input: &str) -> RunSummary {
        let config_snapshot = serde_json::to_value(&self.config).unwrap_or_default();
        let mut record = RunRecord::started(run_id, input, config_snapshot);
        fail_open("run_store::save_start", || self.store.save(&record)).await;
        info!("Run {} started", run_id);

        let mut state = OrchestrationState::new(input);
        let outcome = self.execute(run_id, &mut state).await;

        let summary = match outcome {
            Ok(reason) => {
                let location = fail_open("deliverables::write", || {
                    self.deliverables.write(run_id, &state, false)
                })
                .await;

                let feedback = state
                    .latest_record()
                    .map(|r| r.reasoning.clone())
                    .unwrap_or_default();
                record.complete(
                    state.iteration_count,
                    state.latest_record().map(|r| r.quality_score),
                    feedback,
                );
                record.output_location = location.clone();
                info!("Run {} completed: {}", run_id, reason);

                RunSummary {
                    run_id: run_id.to_string(),
                    status: RunStatus::Completed,
                    stop_reason: Some(reason),
                    state,
                    output_location: location,
                    error: None,
                }
            }
            Err(e) => {
                error!("Run {} failed: {}", run_id, e);
                let location = fail_open("deliverables::write_partial", || {
                    self.deliverables.write(run_id, &state, true)
                })
                .await;

                record.iterations = state.iteration_count;
                record.output_location = location.clone();
                record.fail(e.to_string());

                RunSummary {
                    run_id: run_id.to_string(),
                    status: RunStatus::Failed,
                    stop_reason: None,
                    state,
                    output_location: location,
                    error: Some(e.to_string()),
                }
            }
        };

        fail_open("run_store::save_end", || self.store.save(&record)).await;
        summary
    }

    async fn execute(&self, run_id: &str, state: &mut OrchestrationState) -> Result<StopReason> {
        let sandbox = build_sandbox(&self.config, run_id, self.gateway.clone())?;
        let mut orchestrator = Orchestrator::new(self.config.clone(), self.gateway.clone())
            .with_sandbox(sandbox)
            .with_approval(self.approval.clone());
        if let Some(root) = &self.activity_root {
            orchestrator = orchestrator.with_activity_logger(ActivityLogger::new(root.join(run_id)));
        }
        orchestrator.run(run_id, state).await
    }

    /// Run several requests concurrently, each isolated in its own state and sandbox root
    ///
    /// Summaries come back in input order.
    pub async fn run_many(self: &Arc<Self>, inputs: Vec<String>) -> Vec<RunSummary> {
        let run_ids: Vec<String> = inputs.iter().map(|_| new_run_id()).collect();
        let mut tasks = JoinSet::new();

        for (index, input) in inputs.iter().cloned().enumerate() {
            let service = Arc::clone(self);
            let run_id = run_ids[index].clone();
            tasks.spawn(async move { (index, service.run_with_id(&run_id, &input).await) });
        }

        let mut slots: Vec<Option<RunSummary>> = vec![None; inputs.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, summary)) => slots[index] = Some(summary),
                Err(e) => error!("Run task ended abnormally: {}", e),
            }
        }

        slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| RunSummary {
                    run_id: run_ids[index].clone(),
                    status: RunStatus::Failed,
                    stop_reason: None,
                    state: OrchestrationState::new(inputs[index].clone()),
                    output_location: None,
                    error: Some("Run task ended abnormally".to_string()),
                })
            })
            .collect()
    }
}
