//! Writes a run's snapshot to `<deliverables>/<run_id>/`

use coop_core::{Language, OrchestrationState, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Serialize)]
struct StateFile<'a> {
    run_id: &'a str,
    partial: bool,
    iteration_count: usize,
    halted: bool,
    ceiling_reached: bool,
    stage_executions: usize,
    degraded_judgments: usize,
    iteration_log: &'a [coop_core::IterationRecord],
}

pub struct DeliverableWriter {
    root: PathBuf,
    language: Language,
}

impl DeliverableWriter {
    pub fn new(root: impl Into<PathBuf>, language: Language) -> Self {
        Self {
            root: root.into(),
            language,
        }
    }

    pub fn run_dir(&self, run_id: &str) -> PathBuf {
        self.root.join(run_id)
    }

    /// Write every snapshot field plus `state.json`
    ///
    /// `partial` marks deliverables flushed from a failed run.
    pub async fn write(&self, run_id: &str, state: &OrchestrationState, partial: bool) -> Result<PathBuf> {
        let dir = self.run_dir(run_id);
        fs::create_dir_all(&dir).await?;

        let snapshot = &state.snapshot;
        let files = [
            ("requirements.md", "Requirements", &snapshot.requirements),
            ("design.md", "Design", &snapshot.design),
            ("test_results.md", "Test Results", &snapshot.test_results),
            ("review.md", "Review Feedback", &snapshot.review_feedback),
            ("strategic_guidance.md", "Strategic Guidance", &snapshot.strategic_guidance),
        ];
        for (name, title, body) in files {
            if body.trim().is_empty() {
                continue;
            }
            write_text(&dir, name, &format!("# {}\n\n{}\n", title, body.trim_end())).await?;
        }

        if !snapshot.code.trim().is_empty() {
            let name = format!("main.{}", self.language.extension());
            write_text(&dir, &name, &snapshot.code).await?;
        }

        let state_file = StateFile {
            run_id,
            partial,
            iteration_count: state.iteration_count,
            halted: state.halted,
            ceiling_reached: state.ceiling_reached,
            stage_executions: state.stage_executions,
            degraded_judgments: state.degraded_judgments,
            iteration_log: &state.iteration_log,
        };
        write_text(&dir, "state.json", &serde_json::to_string_pretty(&state_file)?).await?;

        info!("Deliverables for {} written to {}", run_id, dir.display());
        Ok(dir)
    }
}

async fn write_text(dir: &Path, name: &str, content: &str) -> Result<()> {
    fs::write(dir.join(name), content).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_writes_non_empty_fields() {
        let dir = TempDir::new().unwrap();
        let writer = DeliverableWriter::new(dir.path(), Language::C);

        let mut state = OrchestrationState::new("hello world in C");
        state.snapshot.requirements = "print hello".to_string();
        state.snapshot.code = "int main(){return 0;}\n".to_string();
        state.iteration_count = 1;

        let out = writer.write("run-9", &state, false).await.unwrap();
        assert_eq!(out, dir.path().join("run-9"));
        assert_eq!(
            std::fs::read_to_string(out.join("requirements.md")).unwrap(),
            "# Requirements\n\nprint hello\n"
        );
        assert_eq!(
            std::fs::read_to_string(out.join("main.c")).unwrap(),
            "int main(){return 0;}\n"
        );
        assert!(!out.join("design.md").exists());

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("state.json")).unwrap()).unwrap();
        assert_eq!(json["iteration_count"], 1);
        assert_eq!(json["partial"], false);
    }
}
