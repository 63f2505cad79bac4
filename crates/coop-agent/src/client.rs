//! HTTP gateway for an Ollama-compatible model server
//!
//! Each role call is a single stateless `POST /api/chat`. Model availability is
//! checked against `GET /api/tags` and cached per client. Rate limits and
//! server errors are retried with exponential backoff; hard failures feed the
//! circuit breaker.

use crate::circuit_breaker::CircuitBreaker;
use crate::gateway::Gateway;
use crate::types::{model_matches, ChatOptions, ChatRequest, ChatResponse, TagsResponse};
use async_trait::async_trait;
use coop_core::{ChatMessage, CoopError, GatewayConfig, Result, RoleConfig};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 1000;
const MAX_BACKOFF_MS: u64 = 30_000;

/// Gateway backed by an Ollama chat endpoint
pub struct OllamaGateway {
    http: reqwest::Client,
    base_url: String,
    timeout_secs: u64,
    breaker: CircuitBreaker,
    installed: Mutex<Option<Vec<String>>>,
    max_retries: u32,
    initial_backoff: Duration,
}

impl OllamaGateway {
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| CoopError::Gateway(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout_secs,
            breaker: CircuitBreaker::default(),
            installed: Mutex::new(None),
            max_retries: MAX_RETRIES,
            initial_backoff: Duration::from_millis(INITIAL_BACKOFF_MS),
        })
    }

    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        Self::new(config.base_url.clone(), config.timeout_secs)
    }

    /// Override retry behaviour
    pub fn with_retries(mut self, max_retries: u32, initial_backoff: Duration) -> Self {
        self.max_retries = max_retries;
        self.initial_backoff = initial_backoff;
        self
    }

    pub fn with_circuit_breaker(mut self, breaker: CircuitBreaker) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Fail with `ModelUnavailable` unless the server lists the role's model
    pub async fn check_model_availability(&self, role: &RoleConfig) -> Result<()> {
        let mut cache = self.installed.lock().await;

        if let Some(names) = cache.as_ref() {
            if names.iter().any(|n| model_matches(&role.model, n)) {
                return Ok(());
            }
        }

        // Unknown or stale cache: the model may have been pulled since the last fetch
        let names = self.fetch_installed().await?;
        let found = names.iter().any(|n| model_matches(&role.model, n));
        *cache = Some(names);

        if found {
            Ok(())
        } else {
            Err(CoopError::ModelUnavailable {
                model: role.model.clone(),
                role: role.role.to_string(),
            })
        }
    }

    async fn fetch_installed(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| CoopError::Gateway(format!("Failed to list models: {}", e)))?;

        if !response.status().is_success() {
            return Err(CoopError::Gateway(format!(
                "Listing models failed with status {}",
                response.status()
            )));
        }

        let tags: TagsResponse = response
            .json()
            .await
            .map_err(|e| CoopError::Gateway(format!("Failed to parse model list: {}", e)))?;

        debug!("Model server lists {} models", tags.models.len());
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    fn map_send_error(&self, e: reqwest::Error) -> CoopError {
        if e.is_timeout() {
            CoopError::Gateway(format!(
                "Model call timed out after {} seconds",
                self.timeout_secs
            ))
        } else {
            CoopError::Gateway(format!("Failed to send request: {}", e))
        }
    }
}

#[async_trait]
impl Gateway for OllamaGateway {
    async fn generate(&self, role: &RoleConfig, messages: &[ChatMessage]) -> Result<String> {
        if !self.breaker.can_execute() {
            return Err(CoopError::GatewayLimit(format!(
                "Circuit breaker is OPEN. Wait {} seconds before retry.",
                self.breaker.time_until_retry() / 1000
            )));
        }

        self.check_model_availability(role).await?;

        let request = ChatRequest {
            model: &role.model,
            messages,
            stream: false,
            options: ChatOptions {
                temperature: role.temperature,
                num_predict: role.max_tokens,
            },
        };
        let url = format!("{}/api/chat", self.base_url);

        let mut retries = 0;
        let mut backoff = self.initial_backoff;

        loop {
            debug!(
                "Calling {} for {} (attempt {})",
                role.model,
                role.role,
                retries + 1
            );

            let response = match self.http.post(&url).json(&request).send().await {
                Ok(response) => response,
                Err(e) => {
                    self.breaker.record_failure();
                    return Err(self.map_send_error(e));
                }
            };

            let status = response.status();

            if status.as_u16() == 429 || status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                if retries >= self.max_retries {
                    self.breaker.record_failure();
                    return Err(CoopError::GatewayLimit(format!(
                        "Model server returned {} after {} retries: {}",
                        status, self.max_retries, body
                    )));
                }
                retries += 1;
                warn!(
                    "Model server returned {}. Waiting {:?} before retry {}/{}",
                    status, backoff, retries, self.max_retries
                );
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(Duration::from_millis(MAX_BACKOFF_MS));
                continue;
            }

            if status.as_u16() == 404 {
                // The server dropped the model after the availability check
                self.installed.lock().await.take();
                return Err(CoopError::ModelUnavailable {
                    model: role.model.clone(),
                    role: role.role.to_string(),
                });
            }

            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                self.breaker.record_failure();
                return Err(CoopError::Gateway(format!(
                    "Model server error {}: {}",
                    status, body
                )));
            }

            let chat: ChatResponse = response
                .json()
                .await
                .map_err(|e| CoopError::Gateway(format!("Failed to parse response: {}", e)))?;

            self.breaker.record_success();
            info!(
                "{} responded ({} chars, {} prompt tokens, {} output tokens)",
                role.role,
                chat.message.content.len(),
                chat.prompt_eval_count.unwrap_or(0),
                chat.eval_count.unwrap_or(0)
            );
            return Ok(chat.message.content);
        }
    }
}
