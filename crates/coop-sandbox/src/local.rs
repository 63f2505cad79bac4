//! In-process sandbox
//!
//! Owns a directory boundary and a command engine, and runs the programmer
//! role as a bounded tool-using agent inside it.

use crate::agent_loop::AgentLoop;
use crate::router::InstructionRouter;
use crate::sandbox::{invoke_tool_via, CodeArtifact, Sandbox};
use crate::testing::{run_test_plan, TestPlan};
use async_trait::async_trait;
use coop_agent::Gateway;
use coop_core::{CoopConfig, Language, Result, Role, RoleConfig, Snapshot};
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, instrument};

pub struct LocalSandbox {
    router: Arc<InstructionRouter>,
    gateway: Arc<dyn Gateway>,
    role: RoleConfig,
    max_steps: usize,
    language: Language,
}

impl LocalSandbox {
    pub fn new(
        router: Arc<InstructionRouter>,
        gateway: Arc<dyn Gateway>,
        role: RoleConfig,
        max_steps: usize,
        language: Language,
    ) -> Self {
        Self {
            router,
            gateway,
            role,
            max_steps: max_steps.max(1),
            language,
        }
    }

    /// Sandbox rooted at `root`, with limits and roles from `config`
    pub fn from_config(root: &Path, config: &CoopConfig, gateway: Arc<dyn Gateway>) -> Result<Self> {
        let router = InstructionRouter::at_root(
            root,
            config.sandbox.command_whitelist.clone(),
            config.sandbox.command_timeout_secs,
        )?;
        info!("Local sandbox at {}", router.root().display());

        Ok(Self::new(
            Arc::new(router),
            gateway,
            config.role_config(Role::Programmer),
            config.sandbox.agent_max_steps,
            config.workflow.language,
        ))
    }

    pub fn root(&self) -> &Path {
        self.router.root()
    }
}

#[async_trait]
impl Sandbox for LocalSandbox {
    #[instrument(skip(self, snapshot), fields(root = %self.root().display()))]
    async fn run(&self, snapshot: &Snapshot) -> Result<CodeArtifact> {
        AgentLoop::new(
            self.gateway.as_ref(),
            &self.role,
            self.router.as_ref(),
            self.max_steps,
            self.language,
        )
        .run(snapshot)
        .await
    }

    async fn run_tests(&self, code: &str, tests: &str, language: Language) -> String {
        let plan = TestPlan::for_tests(language, code, tests);
        run_test_plan(self.router.as_ref(), &plan).await
    }

    async fn invoke_tool(&self, name: &str, args: &Value) -> String {
        invoke_tool_via(self.router.as_ref(), name, args).await
    }

    fn describe(&self) -> String {
        format!("local sandbox at {}", self.root().display())
    }
}
