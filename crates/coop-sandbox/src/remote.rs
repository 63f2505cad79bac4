//! Client side of the sandbox service
//!
//! Instructions are POSTed as JSON to `{base_url}/instruction`. Transport
//! problems never escape as errors: they come back as error results so the
//! workflow keeps going.

use crate::protocol::{SandboxInstruction, SandboxResult};
use crate::router::InstructionHandler;
use crate::sandbox::{code_context, invoke_tool_via, CodeArtifact, Sandbox};
use crate::testing::{extract_code_block, run_test_plan, TestPlan};
use async_trait::async_trait;
use coop_agent::Gateway;
use coop_core::{ChatMessage, CoopConfig, CoopError, Language, Result, Role, RoleConfig, Snapshot};
use reqwest::Client;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[derive(Debug, Clone)]
pub struct RemoteClient {
    client: Client,
    base_url: String,
}

impl RemoteClient {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs.max(1)))
            .build()
            .map_err(|e| CoopError::Transport(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET `/health` on the service
    pub async fn health(&self) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/health", self.base_url))
            .send()
            .await
            .map_err(|e| CoopError::Transport(e.to_string()))?;
        response
            .json::<Value>()
            .await
            .map_err(|e| CoopError::Transport(e.to_string()))
    }

    async fn post(&self, instruction: &SandboxInstruction) -> std::result::Result<SandboxResult, String> {
        let response = self
            .client
            .post(format!("{}/instruction", self.base_url))
            .json(instruction)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        let body = response.text().await.map_err(|e| e.to_string())?;

        // The service answers rejected instructions with a result body and a 4xx
        match serde_json::from_str::<SandboxResult>(&body) {
            Ok(result) => Ok(result),
            Err(_) => Err(format!("HTTP {}: {}", status, body)),
        }
    }
}

#[async_trait]
impl InstructionHandler for RemoteClient {
    async fn handle(&self, instruction: &SandboxInstruction) -> SandboxResult {
        debug!("Remote {} {}", instruction.operation(), instruction.subject());
        match self.post(instruction).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Sandbox service call failed: {}", e);
                SandboxResult::error(format!("Sandbox communication error: {}", e))
            }
        }
    }
}

/// Sandbox backed by a separate service process
///
/// Generation is single-shot: the programmer role writes the code, and the
/// service runs it once.
pub struct RemoteSandbox {
    client: RemoteClient,
    gateway: Arc<dyn Gateway>,
    role: RoleConfig,
    language: Language,
}

impl RemoteSandbox {
    pub fn new(client: RemoteClient, gateway: Arc<dyn Gateway>, role: RoleConfig, language: Language) -> Self {
        Self {
            client,
            gateway,
            role,
            language,
        }
    }

    pub fn from_config(config: &CoopConfig, gateway: Arc<dyn Gateway>) -> Result<Self> {
        let client = RemoteClient::new(
            config.sandbox.remote_url.clone(),
            config.sandbox.command_timeout_secs.saturating_add(30),
        )?;
        Ok(Self::new(
            client,
            gateway,
            config.role_config(Role::Programmer),
            config.workflow.language,
        ))
    }

    pub fn client(&self) -> &RemoteClient {
        &self.client
    }
}

#[async_trait]
impl Sandbox for RemoteSandbox {
    #[instrument(skip(self, snapshot), fields(url = %self.client.base_url()))]
    async fn run(&self, snapshot: &Snapshot) -> Result<CodeArtifact> {
        let messages = vec![
            ChatMessage::system(format!(
                "You are a programmer. Write complete, runnable {} code for the design below. \
                 Reply with the code in a single fenced block.",
                self.language
            )),
            ChatMessage::user(code_context(snapshot, self.language)),
        ];
        let reply = self.gateway.generate(&self.role, &messages).await?;
        let code = extract_code_block(&reply, self.language);

        let plan = TestPlan::for_program(self.language, &code);
        let transcript = run_test_plan(&self.client, &plan).await;

        Ok(CodeArtifact {
            code,
            complete: true,
            transcript,
        })
    }

    async fn run_tests(&self, code: &str, tests: &str, language: Language) -> String {
        let plan = TestPlan::for_tests(language, code, tests);
        run_test_plan(&self.client, &plan).await
    }

    async fn invoke_tool(&self, name: &str, args: &Value) -> String {
        invoke_tool_via(&self.client, name, args).await
    }

    fn describe(&self) -> String {
        format!("remote sandbox at {}", self.client.base_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_service_becomes_error_result() {
        // Port 9 (discard) is almost never served
        let client = RemoteClient::new("http://127.0.0.1:9/", 2).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9");

        let result = client
            .handle(&SandboxInstruction::read_file("main.py"))
            .await;
        assert!(!result.is_success());
        assert!(result
            .message
            .unwrap()
            .starts_with("Sandbox communication error:"));
    }
}
