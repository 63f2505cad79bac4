//! Append-only audit log of processed instructions

use async_trait::async_trait;
use coop_core::Result;
use coop_sandbox::{AuditEntry, InstructionHandler, SandboxInstruction, SandboxResult};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};

/// JSON-lines audit log
///
/// Recording never fails the caller. Write failures are logged and counted.
#[derive(Debug)]
pub struct AuditLogger {
    path: PathBuf,
    failures: AtomicU64,
}

impl AuditLogger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            failures: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of entries that could not be written
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub async fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry).await {
            self.failures.fetch_add(1, Ordering::SeqCst);
            error!(
                "Audit logging failed for {}_{}: {}",
                entry.action, entry.target, e
            );
        }
    }

    async fn append(&self, entry: &AuditEntry) -> Result<()> {
        let line = serde_json::to_string(entry)?;

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

        debug!("Audited {}_{}", entry.action, entry.target);
        Ok(())
    }

    /// Every readable entry in the log, oldest first
    pub async fn load_all(&self) -> Result<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = fs::read_to_string(&self.path).await?;
        let mut entries = Vec::new();
        for line in content.lines() {
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<AuditEntry>(line) {
                Ok(entry) => entries.push(entry),
                Err(e) => debug!("Skipping unreadable audit line: {}", e),
            }
        }
        Ok(entries)
    }
}

/// Handler wrapper that audits every outcome before returning it
pub struct AuditedRouter<H> {
    inner: H,
    logger: Arc<AuditLogger>,
    actor: String,
}

impl<H: InstructionHandler> AuditedRouter<H> {
    pub fn new(inner: H, logger: Arc<AuditLogger>) -> Self {
        Self {
            inner,
            logger,
            actor: "sandbox_client".to_string(),
        }
    }

    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = actor.into();
        self
    }

    pub fn logger(&self) -> &Arc<AuditLogger> {
        &self.logger
    }

    pub fn inner(&self) -> &H {
        &self.inner
    }

    /// Audit a result produced outside the inner handler, such as a rejected body
    pub async fn audit(&self, instruction: &SandboxInstruction, result: &SandboxResult) {
        self.logger
            .record(&AuditEntry::new(&self.actor, instruction, result))
            .await;
    }
}

#[async_trait]
impl<H: InstructionHandler> InstructionHandler for AuditedRouter<H> {
    async fn handle(&self, instruction: &SandboxInstruction) -> SandboxResult {
        let result = self.inner.handle(instruction).await;
        self.audit(instruction, &result).await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coop_sandbox::InstructionRouter;
    use tempfile::TempDir;

    fn audited(dir: &TempDir) -> AuditedRouter<InstructionRouter> {
        let root = dir.path().join("root");
        let router = InstructionRouter::at_root(&root, vec!["ls".to_string()], 5).unwrap();
        let logger = Arc::new(AuditLogger::new(dir.path().join("logs/audit.jsonl")));
        AuditedRouter::new(router, logger)
    }

    #[tokio::test]
    async fn test_success_and_failure_are_audited() {
        let dir = TempDir::new().unwrap();
        let router = audited(&dir);

        router
            .handle(&SandboxInstruction::write_file("a.txt", "hi").with_intent("setup"))
            .await;
        router
            .handle(&SandboxInstruction::read_file("../outside.txt"))
            .await;
        router
            .handle(&SandboxInstruction::execute("rm", vec!["-rf".to_string(), "/".to_string()]))
            .await;

        let entries = router.logger().load_all().await.unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].actor, "sandbox_client");
        assert_eq!(entries[0].intent.as_deref(), Some("setup"));
        assert!(entries[0].result.is_success());
        assert!(!entries[1].result.is_success());
        assert_eq!(
            entries[2].result.message.as_deref(),
            Some("Command not allowed: rm")
        );
        assert_eq!(router.logger().failures(), 0);
    }

    #[tokio::test]
    async fn test_recorded_entry_is_on_disk_when_record_returns() {
        let dir = TempDir::new().unwrap();
        let router = audited(&dir);

        router
            .handle(&SandboxInstruction::write_file("b.txt", "data"))
            .await;

        let raw = std::fs::read_to_string(dir.path().join("logs/audit.jsonl")).unwrap();
        assert!(raw.ends_with('\n'));
        let entry: AuditEntry = serde_json::from_str(raw.trim_end()).unwrap();
        assert_eq!(entry.action, "write_file");
        assert_eq!(entry.target, "b.txt");
    }

    #[tokio::test]
    async fn test_write_failure_is_counted_not_raised() {
        let dir = TempDir::new().unwrap();
        // A directory where the log file should be makes every append fail
        let log_path = dir.path().join("audit.jsonl");
        std::fs::create_dir_all(&log_path).unwrap();

        let router = InstructionRouter::at_root(&dir.path().join("root"), vec![], 5).unwrap();
        let audited = AuditedRouter::new(router, Arc::new(AuditLogger::new(&log_path)));

        let result = audited
            .handle(&SandboxInstruction::write_file("a.txt", "x"))
            .await;
        assert!(result.is_success());
        assert_eq!(audited.logger().failures(), 1);
    }
}
