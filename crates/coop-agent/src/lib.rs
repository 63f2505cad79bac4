//! # coop-agent
//!
//! Reasoning gateway for Coop.
//!
//! - `Gateway`: the async seam every stage, the judge and the sandbox agent
//!   loop call through
//! - `OllamaGateway`: HTTP client with model availability checks, retry with
//!   backoff, and a circuit breaker
//! - `batch_generate`: bounded fan-out with per-call isolation
//! - `ScriptedGateway` (feature `test-support`): deterministic replies per role

mod batch;
mod circuit_breaker;
mod client;
mod gateway;
#[cfg(any(test, feature = "test-support"))]
mod mock;
mod types;

pub use batch::{batch_generate, BatchRequest};
pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use client::OllamaGateway;
pub use gateway::Gateway;
#[cfg(any(test, feature = "test-support"))]
pub use mock::{RecordedCall, ScriptedGateway};
pub use types::{model_matches, ChatOptions, ChatRequest, ChatResponse, TagsResponse};
