//! Activity Logger - human-readable run log in `<activity>/<run_id>/activity.md`
//!
//! Records run start, stage completions, judge verdicts, reflections and the
//! final summary. Every write is fail-open.

use crate::state_machine::Stage;
use chrono::Utc;
use coop_core::fail_open::fail_open;
use coop_core::{IterationRecord, OrchestrationState, Result};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;

/// Maximum characters of stage output quoted in the log
const ACTIVITY_LOG_PREVIEW_CHARS: usize = 500;

pub struct ActivityLogger {
    output_path: PathBuf,
}

impl ActivityLogger {
    /// Logger writing to `<dir>/activity.md`
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            output_path: dir.as_ref().join("activity.md"),
        }
    }

    pub fn path(&self) -> &Path {
        &self.output_path
    }

    pub async fn log_run_start(&self, run_id: &str, input: &str, max_iterations: usize) {
        fail_open("activity_logger::log_run_start", || async {
            if let Some(parent) = self.output_path.parent() {
                fs::create_dir_all(parent).await?;
            }

            let content = format!(
                "# Coop Activity Log\n\n## Run: {}\n**Request**: {}\n**Started**: {}\n**Max Iterations**: {}\n\n---\n\n",
                run_id,
                input.lines().next().unwrap_or(input),
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                max_iterations
            );

            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.output_path)
                .await?;
            file.write_all(content.as_bytes()).await?;
            file.flush().await?;
            Ok(())
        })
        .await;
    }

    pub async fn log_stage(&self, stage: Stage, iteration: usize, output: &str) {
        fail_open("activity_logger::log_stage", || async {
            let preview = if output.chars().count() > ACTIVITY_LOG_PREVIEW_CHARS {
                let head: String = output.chars().take(ACTIVITY_LOG_PREVIEW_CHARS).collect();
                format!("{head}...")
            } else {
                output.to_string()
            };

            let content = format!(
                "### {} (iteration {})\n**Time**: {}\n\n> {}\n\n",
                stage,
                iteration,
                Utc::now().format("%H:%M:%S UTC"),
                preview.replace('\n', "\n> ")
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_judgment(&self, record: &IterationRecord) {
        fail_open("activity_logger::log_judgment", || async {
            let verdict = if record.should_halt { "HALT" } else { "CONTINUE" };
            let content = format!(
                "**Quality Gate {}**: quality={:.2} change={:.2} confidence={:.2} decision={} parse={:?} => {}\n\n{}\n\n---\n\n",
                record.iteration_index,
                record.quality_score,
                record.change_magnitude,
                record.confidence,
                record.decision,
                record.parse_mode,
                verdict,
                record.reasoning
            );
            self.append_internal(&content).await
        })
        .await;
    }

    pub async fn log_run_complete(&self, state: &OrchestrationState, stop_reason: &str) {
        fail_open("activity_logger::log_run_complete", || async {
            let final_quality = state
                .latest_record()
                .map(|r| format!("{:.2}", r.quality_score))
                .unwrap_or_else(|| "n/a".to_string());

            let content = format!(
                "## Run Summary\n\n\
                **Completed**: {}\n\
                **Iterations**: {}\n\
                **Stage Executions**: {}\n\
                **Final Quality**: {}\n\
                **Stop Reason**: {}\n\n",
                Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
                state.iteration_count,
                state.stage_executions,
                final_quality,
                stop_reason
            );
            self.append_internal(&content).await
        })
        .await;
    }

    async fn append_internal(&self, content: &str) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.output_path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}
