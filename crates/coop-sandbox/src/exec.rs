//! Command execution engine
//!
//! Commands are checked against a whitelist before anything is spawned. Allowed
//! commands run with the sandbox root as working directory and are killed when
//! the timeout expires.

use crate::boundary::ContextBoundary;
use coop_core::{CoopError, Result};
use std::path::{Component, Path};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

/// Captured result of one process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn transcript(&self) -> String {
        format!(
            "Exit code: {}\nOutput: {}\nError: {}",
            self.exit_code, self.stdout, self.stderr
        )
    }
}

#[derive(Debug, Clone)]
pub struct CommandEngine {
    boundary: Arc<ContextBoundary>,
    whitelist: Vec<String>,
    timeout: Duration,
}

impl CommandEngine {
    pub fn new(boundary: Arc<ContextBoundary>, whitelist: Vec<String>, timeout_secs: u64) -> Self {
        Self {
            boundary,
            whitelist,
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn is_allowed(&self, command: &str) -> bool {
        self.whitelist.iter().any(|w| w == command)
    }

    pub fn timeout_secs(&self) -> u64 {
        self.timeout.as_secs()
    }

    /// Run a whitelisted command inside the root
    #[instrument(skip(self), fields(root = %self.boundary.root().display()))]
    pub async fn execute(&self, command: &str, args: &[String]) -> Result<CommandOutput> {
        if !self.is_allowed(command) {
            warn!("Refused non-whitelisted command: {}", command);
            return Err(CoopError::CommandNotAllowed(command.to_string()));
        }

        // Relative program paths such as ./test_runner must stay inside the root
        let program = if command.contains('/') {
            self.boundary.get_safe_path(command)?
        } else {
            command.into()
        };
        self.check_path_args(args)?;

        debug!("Executing {} {:?}", command, args);

        let child = Command::new(&program)
            .args(args)
            .current_dir(self.boundary.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| CoopError::Sandbox(format!("Failed to start {}: {}", command, e)))?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                // Dropping the wait future drops the child, which kills it
                warn!("{} exceeded {}s timeout", command, self.timeout.as_secs());
                return Err(CoopError::Timeout(self.timeout.as_secs()));
            }
        };

        let result = CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.success() {
            debug!("{} exited with {}", command, result.exit_code);
        }

        Ok(result)
    }

    /// Arguments that are absolute paths or climb with `..` must resolve inside the root
    fn check_path_args(&self, args: &[String]) -> Result<()> {
        for arg in args {
            if arg.starts_with('-') {
                continue;
            }
            let path = Path::new(arg);
            let climbs = path.components().any(|c| c == Component::ParentDir);
            if (path.is_absolute() || climbs) && !self.boundary.validate(arg) {
                return Err(CoopError::BoundaryViolation(arg.clone()));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn engine(whitelist: &[&str], timeout: u64) -> (TempDir, CommandEngine) {
        let dir = TempDir::new().unwrap();
        let boundary = Arc::new(ContextBoundary::new(dir.path()).unwrap());
        let whitelist = whitelist.iter().map(|s| s.to_string()).collect();
        (dir, CommandEngine::new(boundary, whitelist, timeout))
    }

    #[tokio::test]
    async fn test_non_whitelisted_command_never_spawns() {
        let (dir, engine) = engine(&["python", "ls"], 5);
        let marker = dir.path().join("marker.txt");
        std::fs::write(&marker, "still here").unwrap();

        let err = engine
            .execute("rm", &["marker.txt".to_string()])
            .await
            .unwrap_err();

        assert!(matches!(err, CoopError::CommandNotAllowed(ref c) if c == "rm"));
        assert!(marker.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_in_root() {
        let (dir, engine) = engine(&["ls"], 5);
        std::fs::write(dir.path().join("visible.txt"), "").unwrap();

        let out = engine.execute("ls", &[]).await.unwrap();
        assert!(out.success());
        assert!(out.stdout.contains("visible.txt"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_reported() {
        let (_dir, engine) = engine(&["ls"], 5);
        let out = engine
            .execute("ls", &["does-not-exist".to_string()])
            .await
            .unwrap();
        assert_ne!(out.exit_code, 0);
        assert!(!out.stderr.is_empty());
        assert!(out.transcript().starts_with("Exit code: "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout() {
        let (_dir, engine) = engine(&["sleep"], 1);
        let err = engine.execute("sleep", &["5".to_string()]).await.unwrap_err();
        assert!(matches!(err, CoopError::Timeout(1)));
        assert_eq!(err.to_string(), "Command timed out after 1 seconds");
    }

    #[tokio::test]
    async fn test_escaping_path_argument_rejected() {
        let (_dir, engine) = engine(&["cat"], 5);
        let err = engine
            .execute("cat", &["../../etc/passwd".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, CoopError::BoundaryViolation(_)));
    }

    #[tokio::test]
    async fn test_relative_program_outside_root_rejected() {
        let (_dir, engine) = engine(&["../evil"], 5);
        let err = engine.execute("../evil", &[]).await.unwrap_err();
        assert!(matches!(err, CoopError::BoundaryViolation(_)));
    }
}
