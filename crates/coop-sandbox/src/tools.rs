//! Agent tool calls
//!
//! Agents request tools with XML blocks in their output:
//! - `<write_file><path>...</path><content>...</content></write_file>`
//! - `<read_file><path>...</path></read_file>`
//! - `<list_directory><path>...</path></list_directory>`
//! - `<run_command><command>...</command><arg>...</arg></run_command>`
//! - `<submit_deliverable><content>...</content></submit_deliverable>`
//!
//! The same calls can be made programmatically by name with JSON arguments.

use crate::protocol::SandboxInstruction;
use serde_json::Value;

/// A tool request parsed from agent output or built from JSON
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    WriteFile { path: String, content: String },
    ReadFile { path: String },
    ListDirectory { path: String },
    RunCommand { command: String, args: Vec<String> },
    SubmitDeliverable { content: String },
}

const TOOL_TAGS: [&str; 5] = [
    "write_file",
    "read_file",
    "list_directory",
    "run_command",
    "submit_deliverable",
];

impl ToolCall {
    pub fn name(&self) -> &'static str {
        match self {
            ToolCall::WriteFile { .. } => "write_file",
            ToolCall::ReadFile { .. } => "read_file",
            ToolCall::ListDirectory { .. } => "list_directory",
            ToolCall::RunCommand { .. } => "run_command",
            ToolCall::SubmitDeliverable { .. } => "submit_deliverable",
        }
    }

    /// Build a call from a tool name and JSON arguments
    pub fn from_json(name: &str, args: &Value) -> Result<Self, String> {
        let field = |key: &str| -> Result<String, String> {
            args.get(key)
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| format!("Missing argument '{}' for {}", key, name))
        };

        match name {
            "write_file" => Ok(ToolCall::WriteFile {
                path: field("path")?,
                content: field("content")?,
            }),
            "read_file" => Ok(ToolCall::ReadFile {
                path: field("path")?,
            }),
            "list_directory" => Ok(ToolCall::ListDirectory {
                path: args
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or(".")
                    .to_string(),
            }),
            "run_command" | "run_shell_command" => {
                let cmd_args = match args.get("args") {
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|v| match v {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect(),
                    Some(Value::String(s)) => s.split_whitespace().map(str::to_string).collect(),
                    _ => Vec::new(),
                };
                Ok(ToolCall::RunCommand {
                    command: field("command")?,
                    args: cmd_args,
                })
            }
            "submit_deliverable" => Ok(ToolCall::SubmitDeliverable {
                content: field("content")?,
            }),
            other => Err(format!("Unknown tool: {}", other)),
        }
    }

    /// The sandbox instruction this call maps to; `None` for submissions
    pub fn to_instruction(&self) -> Option<SandboxInstruction> {
        let instruction = match self {
            ToolCall::WriteFile { path, content } => {
                SandboxInstruction::write_file(path.clone(), content.clone())
            }
            ToolCall::ReadFile { path } => SandboxInstruction::read_file(path.clone()),
            ToolCall::ListDirectory { path } => SandboxInstruction::list_folder(path.clone()),
            ToolCall::RunCommand { command, args } => {
                SandboxInstruction::execute(command.clone(), args.clone())
            }
            ToolCall::SubmitDeliverable { .. } => return None,
        };
        Some(instruction.with_intent(format!("agent tool {}", self.name())))
    }
}

/// Parse every tool block in `text`, in the order they appear
pub fn parse_tool_calls(text: &str) -> Vec<ToolCall> {
    let mut found: Vec<(usize, ToolCall)> = Vec::new();

    for tag in TOOL_TAGS {
        for (offset, block) in find_blocks(text, tag) {
            if let Some(call) = parse_block(tag, block) {
                found.push((offset, call));
            }
        }
    }

    found.sort_by_key(|(offset, _)| *offset);
    found.into_iter().map(|(_, call)| call).collect()
}

/// All `<tag>...</tag>` bodies with their starting offsets
fn find_blocks<'a>(text: &'a str, tag: &str) -> Vec<(usize, &'a str)> {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    let mut blocks = Vec::new();
    let mut cursor = 0;

    while let Some(start) = text[cursor..].find(&open) {
        let block_start = cursor + start + open.len();
        let Some(end) = text[block_start..].find(&close) else {
            break;
        };
        blocks.push((cursor + start, &text[block_start..block_start + end]));
        cursor = block_start + end + close.len();
    }

    blocks
}

fn parse_block(tag: &str, block: &str) -> Option<ToolCall> {
    match tag {
        "write_file" => Some(ToolCall::WriteFile {
            path: extract_tag_content(block, "path")?.trim().to_string(),
            content: strip_edge_newlines(&extract_tag_content(block, "content")?),
        }),
        "read_file" => Some(ToolCall::ReadFile {
            path: extract_tag_content(block, "path")?.trim().to_string(),
        }),
        "list_directory" => Some(ToolCall::ListDirectory {
            path: extract_tag_content(block, "path")
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| ".".to_string()),
        }),
        "run_command" => {
            let command = extract_tag_content(block, "command")?.trim().to_string();
            let mut args: Vec<String> = find_blocks(block, "arg")
                .into_iter()
                .map(|(_, a)| a.trim().to_string())
                .collect();
            if args.is_empty() {
                if let Some(joined) = extract_tag_content(block, "args") {
                    args = joined.split_whitespace().map(str::to_string).collect();
                }
            }
            (!command.is_empty()).then_some(ToolCall::RunCommand { command, args })
        }
        "submit_deliverable" => Some(ToolCall::SubmitDeliverable {
            content: strip_edge_newlines(
                &extract_tag_content(block, "content").unwrap_or_else(|| block.to_string()),
            ),
        }),
        _ => None,
    }
}

/// Extract content between <tag> and </tag>
fn extract_tag_content(text: &str, tag: &str) -> Option<String> {
    let open_tag = format!("<{}>", tag);
    let close_tag = format!("</{}>", tag);

    let start = text.find(&open_tag)?;
    let content_start = start + open_tag.len();
    let end = text[content_start..].find(&close_tag)?;

    Some(text[content_start..content_start + end].to_string())
}

/// Drop the single newline models put right after an opening tag and before a closing one
fn strip_edge_newlines(s: &str) -> String {
    let s = s.strip_prefix("\r\n").or_else(|| s.strip_prefix('\n')).unwrap_or(s);
    let s = s.strip_suffix("\r\n").or_else(|| s.strip_suffix('\n')).unwrap_or(s);
    s.to_string()
}

/// Instructions for agents on how to call tools
pub fn tool_instructions() -> &'static str {
    r#"## TOOLS

You work inside a sandbox directory. Request tools with XML blocks in your reply.
Tool results are sent back to you in the next message.

<write_file>
<path>main.py</path>
<content>
print("hello")
</content>
</write_file>

<read_file><path>main.py</path></read_file>

<list_directory><path>.</path></list_directory>

<run_command>
<command>python</command>
<arg>main.py</arg>
</run_command>

When the code is finished and tested, submit the complete final source:

<submit_deliverable>
<content>
...full source code...
</content>
</submit_deliverable>

IMPORTANT:
- Paths are relative to the sandbox directory
- Only whitelisted commands can be run
- Submitting ends the session
"#
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_calls_in_order() {
        let output = r#"
First I'll look around.
<list_directory><path>.</path></list_directory>
Then write:
<write_file>
<path>main.py</path>
<content>
def add(a, b):
    return a + b
</content>
</write_file>
<run_command><command>python</command><arg>main.py</arg></run_command>
"#;
        let calls = parse_tool_calls(output);
        assert_eq!(calls.len(), 3);
        assert_eq!(
            calls[0],
            ToolCall::ListDirectory {
                path: ".".to_string()
            }
        );
        assert_eq!(
            calls[1],
            ToolCall::WriteFile {
                path: "main.py".to_string(),
                content: "def add(a, b):\n    return a + b".to_string(),
            }
        );
        assert_eq!(
            calls[2],
            ToolCall::RunCommand {
                command: "python".to_string(),
                args: vec!["main.py".to_string()],
            }
        );
    }

    #[test]
    fn test_args_fallback_splits_whitespace() {
        let calls = parse_tool_calls(
            "<run_command><command>python</command><args>-m pytest -q</args></run_command>",
        );
        assert_eq!(
            calls,
            vec![ToolCall::RunCommand {
                command: "python".to_string(),
                args: vec!["-m".to_string(), "pytest".to_string(), "-q".to_string()],
            }]
        );
    }

    #[test]
    fn test_unclosed_block_ignored() {
        let calls = parse_tool_calls("<write_file><path>a</path><content>x");
        assert!(calls.is_empty());
    }

    #[test]
    fn test_submit_without_content_tag_uses_body() {
        let calls = parse_tool_calls("<submit_deliverable>print(1)</submit_deliverable>");
        assert_eq!(
            calls,
            vec![ToolCall::SubmitDeliverable {
                content: "print(1)".to_string()
            }]
        );
    }

    #[test]
    fn test_from_json() {
        let call = ToolCall::from_json(
            "run_command",
            &serde_json::json!({"command": "ls", "args": ["-la"]}),
        )
        .unwrap();
        assert_eq!(
            call,
            ToolCall::RunCommand {
                command: "ls".to_string(),
                args: vec!["-la".to_string()]
            }
        );

        let err = ToolCall::from_json("read_file", &serde_json::json!({})).unwrap_err();
        assert!(err.contains("path"));

        let err = ToolCall::from_json("format_disk", &serde_json::json!({})).unwrap_err();
        assert_eq!(err, "Unknown tool: format_disk");
    }

    #[test]
    fn test_to_instruction() {
        let instr = ToolCall::WriteFile {
            path: "a.py".to_string(),
            content: "x".to_string(),
        }
        .to_instruction()
        .unwrap();
        assert_eq!(instr.operation(), "write_file");
        assert_eq!(instr.content.as_deref(), Some("x"));

        let submit = ToolCall::SubmitDeliverable {
            content: String::new(),
        };
        assert!(submit.to_instruction().is_none());
    }
}
