//! Sandbox wire protocol
//!
//! The same instruction/result pair is used in-process by the local sandbox and
//! over HTTP by the remote one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One operation against a sandbox root
///
/// Unknown fields are rejected. `action` and `target` are free strings so an
/// unsupported pair still deserializes and gets a structured error back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SandboxInstruction {
    #[serde(default)]
    pub action: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Why the caller issued this instruction, recorded in the audit log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl SandboxInstruction {
    pub fn read_file(path: impl Into<String>) -> Self {
        Self {
            action: "read".to_string(),
            target: "file".to_string(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn write_file(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            action: "write".to_string(),
            target: "file".to_string(),
            path: path.into(),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn list_folder(path: impl Into<String>) -> Self {
        Self {
            action: "list".to_string(),
            target: "folder".to_string(),
            path: path.into(),
            ..Default::default()
        }
    }

    pub fn execute(command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            action: "execute".to_string(),
            target: "script".to_string(),
            command: Some(command.into()),
            args,
            ..Default::default()
        }
    }

    pub fn with_intent(mut self, intent: impl Into<String>) -> Self {
        self.intent = Some(intent.into());
        self
    }

    /// `"<action>_<target>"`, the audit action name
    pub fn operation(&self) -> String {
        format!("{}_{}", self.action, self.target)
    }

    /// What the instruction touches: the command line for executions, else the path
    pub fn subject(&self) -> String {
        match &self.command {
            Some(command) if self.action == "execute" => {
                if self.args.is_empty() {
                    command.clone()
                } else {
                    format!("{} {}", command, self.args.join(" "))
                }
            }
            _ => self.path.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Success,
    Error,
}

/// Outcome of one instruction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResult {
    pub status: ResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl SandboxResult {
    fn empty(status: ResultStatus) -> Self {
        Self {
            status,
            message: None,
            content: None,
            items: None,
            output: None,
            error: None,
            exit_code: None,
        }
    }

    pub fn success(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(ResultStatus::Success)
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Self::empty(ResultStatus::Error)
        }
    }

    pub fn file_content(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::empty(ResultStatus::Success)
        }
    }

    pub fn listing(items: Vec<String>) -> Self {
        Self {
            items: Some(items),
            ..Self::empty(ResultStatus::Success)
        }
    }

    /// Process result; status follows the exit code
    pub fn execution(exit_code: i32, stdout: String, stderr: String) -> Self {
        let status = if exit_code == 0 {
            ResultStatus::Success
        } else {
            ResultStatus::Error
        };
        Self {
            output: Some(stdout),
            error: Some(stderr),
            exit_code: Some(exit_code),
            ..Self::empty(status)
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }

    pub fn is_execution(&self) -> bool {
        self.exit_code.is_some()
    }

    /// `Exit code / Output / Error` block for an execution result
    pub fn transcript(&self) -> String {
        format!(
            "Exit code: {}\nOutput: {}\nError: {}",
            self.exit_code
                .map(|c| c.to_string())
                .unwrap_or_else(|| "none".to_string()),
            self.output.as_deref().unwrap_or(""),
            self.error
                .as_deref()
                .or(self.message.as_deref())
                .unwrap_or("")
        )
    }

    /// Plain-text rendering fed back to an agent
    pub fn to_text(&self) -> String {
        if self.is_execution() {
            return self.transcript();
        }
        if let Some(content) = &self.content {
            return content.clone();
        }
        if let Some(items) = &self.items {
            return if items.is_empty() {
                "(empty directory)".to_string()
            } else {
                items.join("\n")
            };
        }
        let message = self.message.as_deref().unwrap_or("");
        match self.status {
            ResultStatus::Success => message.to_string(),
            ResultStatus::Error => format!("Error: {}", message),
        }
    }
}

/// One line of the audit log
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    /// `"<action>_<target>"`
    pub action: String,
    pub target: String,
    pub result: SandboxResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

impl AuditEntry {
    pub fn new(actor: &str, instruction: &SandboxInstruction, result: &SandboxResult) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.to_string(),
            action: instruction.operation(),
            target: instruction.subject(),
            result: result.clone(),
            intent: instruction.intent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_fields_rejected() {
        let err = serde_json::from_str::<SandboxInstruction>(
            r#"{"action": "read", "target": "file", "path": "a", "sudo": true}"#,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let instr: SandboxInstruction = serde_json::from_str(r#"{"path": "a.txt"}"#).unwrap();
        assert!(instr.action.is_empty());
        assert!(instr.target.is_empty());
    }

    #[test]
    fn test_result_skips_empty_fields() {
        let json = serde_json::to_value(SandboxResult::error("nope")).unwrap();
        assert_eq!(json, serde_json::json!({"status": "error", "message": "nope"}));
    }

    #[test]
    fn test_execution_status_follows_exit_code() {
        let ok = SandboxResult::execution(0, "hi\n".to_string(), String::new());
        assert!(ok.is_success());
        let failed = SandboxResult::execution(2, String::new(), "boom".to_string());
        assert!(!failed.is_success());
        assert_eq!(failed.transcript(), "Exit code: 2\nOutput: \nError: boom");
    }

    #[test]
    fn test_audit_entry_names_operation() {
        let instr = SandboxInstruction::execute("ls", vec!["-la".to_string()]).with_intent("look");
        let entry = AuditEntry::new("sandbox_client", &instr, &SandboxResult::success("ok"));
        assert_eq!(entry.action, "execute_script");
        assert_eq!(entry.target, "ls -la");
        assert_eq!(entry.intent.as_deref(), Some("look"));
    }
}
