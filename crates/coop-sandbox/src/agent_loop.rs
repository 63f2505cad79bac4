//! Bounded agent-tool loop
//!
//! Each step sends the conversation to the gateway, runs the tool calls found
//! in the reply, and appends their output. A `submit_deliverable` call ends the
//! loop. Running out of steps yields a placeholder flagged incomplete.

use crate::router::InstructionHandler;
use crate::sandbox::{code_context, CodeArtifact};
use crate::testing::extract_code_block;
use crate::tools::{parse_tool_calls, tool_instructions, ToolCall};
use coop_agent::Gateway;
use coop_core::{ChatMessage, Language, Result, RoleConfig, Snapshot};
use tracing::{debug, info, warn};

const RESULT_PREVIEW_CHARS: usize = 4000;

pub struct AgentLoop<'a> {
    gateway: &'a dyn Gateway,
    role: &'a RoleConfig,
    handler: &'a dyn InstructionHandler,
    max_steps: usize,
    language: Language,
}

impl<'a> AgentLoop<'a> {
    pub fn new(
        gateway: &'a dyn Gateway,
        role: &'a RoleConfig,
        handler: &'a dyn InstructionHandler,
        max_steps: usize,
        language: Language,
    ) -> Self {
        Self {
            gateway,
            role,
            handler,
            max_steps,
            language,
        }
    }

    fn system_prompt(&self) -> String {
        format!(
            "You are a programmer working in an isolated sandbox. Write {} code that \
             satisfies the requirements and design, run it to check it works, then submit it.\n\n{}",
            self.language,
            tool_instructions()
        )
    }

    /// Drive the loop. Gateway failures propagate; tool failures are fed back to the agent.
    pub async fn run(&self, snapshot: &Snapshot) -> Result<CodeArtifact> {
        let mut history = vec![
            ChatMessage::system(self.system_prompt()),
            ChatMessage::user(code_context(snapshot, self.language)),
        ];
        let mut transcript = Vec::new();

        for step in 1..=self.max_steps {
            info!("=== Agent step {} of {} ===", step, self.max_steps);

            let reply = self.gateway.generate(self.role, &history).await?;
            history.push(ChatMessage::assistant(reply.clone()));

            let calls = parse_tool_calls(&reply);
            if calls.is_empty() {
                debug!("Step {} produced no tool calls", step);
                transcript.push(format!("Step {}: no tool call", step));
                history.push(ChatMessage::user(
                    "No tool call found. Use the tool blocks described above and call \
                     submit_deliverable when the code is finished.",
                ));
                continue;
            }

            let mut results = Vec::new();
            for call in calls {
                if let ToolCall::SubmitDeliverable { content } = call {
                    transcript.push(format!("Step {}: submit_deliverable", step));
                    info!("Deliverable submitted at step {}", step);
                    return Ok(CodeArtifact {
                        code: extract_code_block(&content, self.language),
                        complete: true,
                        transcript: transcript.join("\n"),
                    });
                }

                let output = match call.to_instruction() {
                    Some(instruction) => self.handler.handle(&instruction).await.to_text(),
                    None => continue,
                };
                transcript.push(format!("Step {}: {}", step, call.name()));
                results.push(format!(
                    "<tool_result name=\"{}\">\n{}\n</tool_result>",
                    call.name(),
                    preview(&output)
                ));
            }

            history.push(ChatMessage::user(results.join("\n\n")));
        }

        warn!(
            "Agent did not submit a deliverable within {} steps",
            self.max_steps
        );
        transcript.push(format!("Step limit {} reached without submission", self.max_steps));
        Ok(CodeArtifact {
            code: placeholder_code(self.language, self.max_steps),
            complete: false,
            transcript: transcript.join("\n"),
        })
    }
}

/// Stand-in source returned when the loop ends without a submission
pub fn placeholder_code(language: Language, steps: usize) -> String {
    let comment = match language {
        Language::Python => "#",
        Language::JavaScript | Language::C => "//",
    };
    format!(
        "{} INCOMPLETE: no deliverable was submitted within {} agent steps.\n",
        comment, steps
    )
}

fn preview(text: &str) -> String {
    if text.chars().count() > RESULT_PREVIEW_CHARS {
        let head: String = text.chars().take(RESULT_PREVIEW_CHARS).collect();
        format!("{}\n... [truncated]", head)
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::router::InstructionRouter;
    use coop_agent::ScriptedGateway;
    use coop_core::Role;
    use tempfile::TempDir;

    fn role() -> RoleConfig {
        RoleConfig {
            role: Role::Programmer,
            model: "coder".to_string(),
            temperature: 0.2,
            max_tokens: 512,
        }
    }

    fn snapshot() -> Snapshot {
        Snapshot {
            requirements: "add(a, b)".to_string(),
            design: "single function".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_write_then_submit() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let gateway = ScriptedGateway::new();
        gateway.push(
            Role::Programmer,
            "<write_file><path>main.py</path><content>def add(a, b):\n    return a + b\n</content></write_file>",
        );
        gateway.push(
            Role::Programmer,
            "<submit_deliverable><content>```python\ndef add(a, b):\n    return a + b\n```</content></submit_deliverable>",
        );

        let role = role();
        let artifact = AgentLoop::new(&gateway, &role, &router, 10, Language::Python)
            .run(&snapshot())
            .await
            .unwrap();

        assert!(artifact.complete);
        assert_eq!(artifact.code, "def add(a, b):\n    return a + b\n");
        assert!(dir.path().join("main.py").exists());
        assert_eq!(gateway.calls_for(Role::Programmer), 2);

        // The second call saw the tool result from the first
        let calls = gateway.calls();
        let last = calls[1].messages.last().unwrap();
        assert!(last.content.contains("tool_result name=\"write_file\""));
    }

    #[tokio::test]
    async fn test_step_limit_yields_incomplete_placeholder() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let gateway = ScriptedGateway::new();
        gateway.always(Role::Programmer, "thinking about it...");

        let role = role();
        let artifact = AgentLoop::new(&gateway, &role, &router, 3, Language::C)
            .run(&snapshot())
            .await
            .unwrap();

        assert!(!artifact.complete);
        assert!(artifact.code.starts_with("// INCOMPLETE"));
        assert_eq!(gateway.calls_for(Role::Programmer), 3);
    }

    #[tokio::test]
    async fn test_gateway_error_propagates() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let gateway = ScriptedGateway::new();
        gateway.push_unavailable(Role::Programmer);

        let role = role();
        let err = AgentLoop::new(&gateway, &role, &router, 3, Language::Python)
            .run(&snapshot())
            .await
            .unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_tool_errors_are_fed_back() {
        let dir = TempDir::new().unwrap();
        let router = InstructionRouter::at_root(dir.path(), vec![], 5).unwrap();
        let gateway = ScriptedGateway::new();
        gateway.push(Role::Programmer, "<read_file><path>../secret</path></read_file>");
        gateway.push(Role::Programmer, "<submit_deliverable>pass</submit_deliverable>");

        let role = role();
        let artifact = AgentLoop::new(&gateway, &role, &router, 5, Language::Python)
            .run(&snapshot())
            .await
            .unwrap();
        assert!(artifact.complete);

        let calls = gateway.calls();
        let feedback = &calls[1].messages.last().unwrap().content;
        assert!(feedback.contains("escapes sandbox root"));
    }
}
