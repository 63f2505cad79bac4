//! The sandbox capability shared by the local and remote implementations

use crate::router::InstructionHandler;
use crate::tools::ToolCall;
use async_trait::async_trait;
use coop_core::{Language, Result, Snapshot};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Code produced by a sandbox run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeArtifact {
    pub code: String,
    /// False when the run ended without a real deliverable
    pub complete: bool,
    /// What happened inside the sandbox while producing the code
    pub transcript: String,
}

/// Confined code generation and execution
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Produce code from the requirements, design, guidance and review feedback
    async fn run(&self, snapshot: &Snapshot) -> Result<CodeArtifact>;

    /// Run `tests` against `code`, returning the raw execution transcript
    async fn run_tests(&self, code: &str, tests: &str, language: Language) -> String;

    /// Call one tool by name with JSON arguments
    async fn invoke_tool(&self, name: &str, args: &Value) -> String;

    /// Short human-readable description for logs
    fn describe(&self) -> String;
}

/// The context a code-producing role sees
pub fn code_context(snapshot: &Snapshot, language: Language) -> String {
    let mut context = format!(
        "Target language: {}\n\n## Requirements\n{}\n\n## Design\n{}\n",
        language, snapshot.requirements, snapshot.design
    );
    if !snapshot.review_feedback.trim().is_empty() {
        context.push_str(&format!(
            "\n## Review Feedback From Last Iteration\n{}\n",
            snapshot.review_feedback
        ));
    }
    if !snapshot.strategic_guidance.trim().is_empty() {
        context.push_str(&format!(
            "\n## Strategic Guidance\n{}\n",
            snapshot.strategic_guidance
        ));
    }
    if !snapshot.code.trim().is_empty() {
        context.push_str(&format!("\n## Previous Code\n{}\n", snapshot.code));
    }
    context
}

/// Execute a named tool through an instruction handler
pub async fn invoke_tool_via<H>(handler: &H, name: &str, args: &Value) -> String
where
    H: InstructionHandler + ?Sized,
{
    match ToolCall::from_json(name, args) {
        Ok(call) => match call.to_instruction() {
            Some(instruction) => handler.handle(&instruction).await.to_text(),
            None => "Deliverable received".to_string(),
        },
        Err(message) => format!("Error: {}", message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InstructionRouter;
    use tempfile::TempDir;

    #[test]
    fn test_context_skips_empty_sections() {
        let snapshot = Snapshot {
            requirements: "sum two ints".to_string(),
            design: "one function".to_string(),
            ..Default::default()
        };
        let ctx = code_context(&snapshot, Language::Python);
        assert!(ctx.starts_with("Target language: python"));
        assert!(!ctx.contains("Review Feedback"));
        assert!(!ctx.contains("Strategic Guidance"));
    }

    #[tokio::test]
    async fn test_invoke_tool_via_router() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();

        let written = invoke_tool_via(
            &router,
            "write_file",
            &serde_json::json!({"path": "notes.md", "content": "# hi"}),
        )
        .await;
        assert!(written.starts_with("Wrote"));

        let read = invoke_tool_via(&router, "read_file", &serde_json::json!({"path": "notes.md"})).await;
        assert_eq!(read, "# hi");

        let unknown = invoke_tool_via(&router, "nuke", &serde_json::json!({})).await;
        assert_eq!(unknown, "Error: Unknown tool: nuke");
    }
}
