//! Instruction router: dispatches `(action, target)` pairs to file and command operations

use crate::boundary::ContextBoundary;
use crate::exec::CommandEngine;
use crate::files::FileOps;
use crate::protocol::{SandboxInstruction, SandboxResult};
use async_trait::async_trait;
use coop_core::{CoopError, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Anything that turns an instruction into a result
///
/// Handlers never fail: every problem comes back as an error result.
#[async_trait]
pub trait InstructionHandler: Send + Sync {
    async fn handle(&self, instruction: &SandboxInstruction) -> SandboxResult;
}

#[derive(Debug, Clone)]
pub struct InstructionRouter {
    files: FileOps,
    engine: CommandEngine,
}

impl InstructionRouter {
    pub fn new(files: FileOps, engine: CommandEngine) -> Self {
        Self { files, engine }
    }

    /// Router over a fresh boundary at `root`
    pub fn at_root(root: &Path, whitelist: Vec<String>, timeout_secs: u64) -> Result<Self> {
        let boundary = Arc::new(ContextBoundary::new(root)?);
        Ok(Self::new(
            FileOps::new(boundary.clone()),
            CommandEngine::new(boundary, whitelist, timeout_secs),
        ))
    }

    pub fn root(&self) -> &Path {
        self.files.boundary().root()
    }

    async fn read_file(&self, instruction: &SandboxInstruction) -> SandboxResult {
        match self.files.read(&instruction.path).await {
            Ok(content) => SandboxResult::file_content(content),
            Err(e) => error_result(e),
        }
    }

    async fn write_file(&self, instruction: &SandboxInstruction) -> SandboxResult {
        let content = instruction.content.as_deref().unwrap_or("");
        match self.files.write(&instruction.path, content).await {
            Ok(()) => SandboxResult::success(format!(
                "Wrote {} bytes to {}",
                content.len(),
                instruction.path
            )),
            Err(e) => error_result(e),
        }
    }

    async fn list_folder(&self, instruction: &SandboxInstruction) -> SandboxResult {
        let path = if instruction.path.is_empty() {
            "."
        } else {
            instruction.path.as_str()
        };
        match self.files.list(path).await {
            Ok(items) => SandboxResult::listing(items),
            Err(e) => error_result(e),
        }
    }

    async fn execute(&self, instruction: &SandboxInstruction) -> SandboxResult {
        let command = match instruction.command.as_deref() {
            Some(c) if !c.trim().is_empty() => c.trim(),
            _ if !instruction.path.is_empty() => instruction.path.as_str(),
            _ => return SandboxResult::error("Missing required field: command"),
        };
        match self.engine.execute(command, &instruction.args).await {
            Ok(out) => SandboxResult::execution(out.exit_code, out.stdout, out.stderr),
            Err(e) => error_result(e),
        }
    }
}

#[async_trait]
impl InstructionHandler for InstructionRouter {
    async fn handle(&self, instruction: &SandboxInstruction) -> SandboxResult {
        let action = instruction.action.trim().to_lowercase();
        let target = instruction.target.trim().to_lowercase();

        let missing: Vec<&str> = [("action", &action), ("target", &target)]
            .into_iter()
            .filter(|(_, v)| v.is_empty())
            .map(|(k, _)| k)
            .collect();
        if !missing.is_empty() {
            return SandboxResult::error(format!(
                "Missing required fields: {}",
                missing.join(", ")
            ));
        }

        debug!("Routing {}/{} {}", action, target, instruction.subject());

        match (action.as_str(), target.as_str()) {
            ("read", "file") => self.read_file(instruction).await,
            ("write", "file") => self.write_file(instruction).await,
            ("list", "folder") | ("list", "directory") => self.list_folder(instruction).await,
            ("execute", "script") | ("execute", "command") => self.execute(instruction).await,
            (a, t) => SandboxResult::error(format!("Unsupported action-target: {}-{}", a, t)),
        }
    }
}

fn error_result(e: CoopError) -> SandboxResult {
    SandboxResult::error(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ResultStatus;
    use tempfile::TempDir;

    fn router(whitelist: &[&str]) -> (TempDir, InstructionRouter) {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(
            dir.path(),
            whitelist.iter().map(|s| s.to_string()).collect(),
            5,
        )
        .unwrap();
        (dir, router)
    }

    #[tokio::test]
    async fn test_write_read_list() {
        let (_dir, router) = router(&[]);
        let written = router
            .handle(&SandboxInstruction::write_file("src/app.py", "x = 1\n"))
            .await;
        assert!(written.is_success());

        let read = router.handle(&SandboxInstruction::read_file("src/app.py")).await;
        assert_eq!(read.content.as_deref(), Some("x = 1\n"));

        let listed = router.handle(&SandboxInstruction::list_folder("")).await;
        assert_eq!(listed.items, Some(vec!["src/".to_string()]));
    }

    #[tokio::test]
    async fn test_directory_alias() {
        let (_dir, router) = router(&[]);
        let instr = SandboxInstruction {
            action: "list".to_string(),
            target: "directory".to_string(),
            ..Default::default()
        };
        assert!(router.handle(&instr).await.is_success());
    }

    #[tokio::test]
    async fn test_unsupported_pair() {
        let (_dir, router) = router(&[]);
        let instr = SandboxInstruction {
            action: "delete".to_string(),
            target: "file".to_string(),
            path: "a".to_string(),
            ..Default::default()
        };
        let result = router.handle(&instr).await;
        assert_eq!(result.status, ResultStatus::Error);
        assert_eq!(
            result.message.as_deref(),
            Some("Unsupported action-target: delete-file")
        );
    }

    #[tokio::test]
    async fn test_missing_fields() {
        let (_dir, router) = router(&[]);
        let result = router.handle(&SandboxInstruction::default()).await;
        assert_eq!(
            result.message.as_deref(),
            Some("Missing required fields: action, target")
        );
    }

    #[tokio::test]
    async fn test_boundary_violation_is_error_result() {
        let (_dir, router) = router(&[]);
        let result = router
            .handle(&SandboxInstruction::read_file("../../etc/passwd"))
            .await;
        assert!(!result.is_success());
        assert!(result.message.unwrap().contains("escapes sandbox root"));
    }

    #[tokio::test]
    async fn test_disallowed_command_is_error_result() {
        let (_dir, router) = router(&["python", "ls"]);
        let result = router
            .handle(&SandboxInstruction::execute("rm", vec!["x".to_string()]))
            .await;
        assert_eq!(result.message.as_deref(), Some("Command not allowed: rm"));
        assert!(result.exit_code.is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_execute_reports_exit_code() {
        let (_dir, router) = router(&["ls"]);
        let result = router
            .handle(&SandboxInstruction::execute("ls", vec![]))
            .await;
        assert_eq!(result.exit_code, Some(0));
        assert!(result.is_success());
    }
}
