//! # coop-sandbox
//!
//! Confined execution for Coop.
//!
//! Every file path is resolved against a `ContextBoundary` before it is
//! touched, and every command goes through a whitelist and a timeout. The
//! same `InstructionHandler` seam serves the in-process router and the HTTP
//! client, so test plans and agent tools run unchanged against either.
//!
//! - `LocalSandbox`: bounded tool-using agent over a per-run directory
//! - `RemoteSandbox`: single-shot generation executed by the sandbox service
//! - `build_sandbox`: picks one from configuration

mod agent_loop;
mod boundary;
mod exec;
mod factory;
mod files;
mod local;
mod protocol;
mod remote;
mod router;
mod sandbox;
mod testing;
mod tools;

pub use agent_loop::{placeholder_code, AgentLoop};
pub use boundary::ContextBoundary;
pub use exec::{CommandEngine, CommandOutput};
pub use factory::build_sandbox;
pub use files::FileOps;
pub use local::LocalSandbox;
pub use protocol::{AuditEntry, ResultStatus, SandboxInstruction, SandboxResult};
pub use remote::{RemoteClient, RemoteSandbox};
pub use router::{InstructionHandler, InstructionRouter};
pub use sandbox::{code_context, invoke_tool_via, CodeArtifact, Sandbox};
pub use testing::{extract_code_block, run_test_plan, TestPlan, TestStep};
pub use tools::{parse_tool_calls, tool_instructions, ToolCall};
