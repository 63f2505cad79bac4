//! Run persistence
//!
//! One record per run, saved at start and again at its terminal state. The
//! JSON-lines store appends every save; the latest line for a run id wins.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use coop_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// Characters of the request kept on the record
const INPUT_SUMMARY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Running => write!(f, "running"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub input_summary: String,
    /// Configuration the run was started with
    pub config_snapshot: serde_json::Value,
    #[serde(default)]
    pub iterations: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_quality: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_location: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunRecord {
    pub fn started(run_id: impl Into<String>, input: &str, config_snapshot: serde_json::Value) -> Self {
        Self {
            run_id: run_id.into(),
            status: RunStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            input_summary: summarize(input),
            config_snapshot,
            iterations: 0,
            final_quality: None,
            final_feedback: None,
            output_location: None,
            error: None,
        }
    }

    pub fn complete(&mut self, iterations: usize, final_quality: Option<f64>, feedback: String) {
        self.status = RunStatus::Completed;
        self.end_time = Some(Utc::now());
        self.iterations = iterations;
        self.final_quality = final_quality;
        self.final_feedback = Some(feedback);
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.end_time = Some(Utc::now());
        self.error = Some(error.into());
    }

    pub fn is_terminal(&self) -> bool {
        self.status != RunStatus::Running
    }
}

fn summarize(input: &str) -> String {
    let line = input.trim();
    if line.chars().count() > INPUT_SUMMARY_CHARS {
        let head: String = line.chars().take(INPUT_SUMMARY_CHARS).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

#[async_trait]
pub trait RunStore: Send + Sync {
    async fn save(&self, record: &RunRecord) -> Result<()>;
    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>>;
    /// Latest record of every run, newest start first
    async fn list(&self) -> Result<Vec<RunRecord>>;
}

pub struct JsonlRunStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlRunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_latest(&self) -> Result<HashMap<String, RunRecord>> {
        let mut latest = HashMap::new();
        if !self.path.exists() {
            return Ok(latest);
        }

        let content = fs::read_to_string(&self.path).await?;
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<RunRecord>(line) {
                Ok(record) => {
                    latest.insert(record.run_id.clone(), record);
                }
                Err(e) => debug!("Skipping unreadable run line: {}", e),
            }
        }
        Ok(latest)
    }
}

#[async_trait]
impl RunStore for JsonlRunStore {
    async fn save(&self, record: &RunRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        let _guard = self.write_lock.lock().await;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await?;
            }
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.write_all(b"\n").await?;
        file.flush().await?;

        debug!("Saved run {} ({})", record.run_id, record.status);
        Ok(())
    }

    async fn get(&self, run_id: &str) -> Result<Option<RunRecord>> {
        Ok(self.load_latest().await?.remove(run_id))
    }

    async fn list(&self) -> Result<Vec<RunRecord>> {
        let mut records: Vec<RunRecord> = self.load_latest().await?.into_values().collect();
        records.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(records)
    }
}
