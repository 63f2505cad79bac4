//! Wire types for the Ollama-compatible chat API

use coop_core::ChatMessage;
use serde::{Deserialize, Serialize};

/// Sampling options sent with each chat request
#[derive(Debug, Clone, Serialize)]
pub struct ChatOptions {
    pub temperature: f32,
    /// Maximum tokens to generate
    pub num_predict: u32,
}

/// `POST /api/chat` request body
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub stream: bool,
    pub options: ChatOptions,
}

/// `POST /api/chat` response body (non-streaming)
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    pub message: ChatResponseMessage,
    #[serde(default)]
    pub eval_count: Option<u64>,
    #[serde(default)]
    pub prompt_eval_count: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponseMessage {
    #[serde(default)]
    pub content: String,
}

/// `GET /api/tags` response body
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TagsResponse {
    #[serde(default)]
    pub models: Vec<ModelTag>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelTag {
    pub name: String,
}

/// Whether `installed` satisfies a request for `wanted`
///
/// An untagged request matches the `:latest` tag.
pub fn model_matches(wanted: &str, installed: &str) -> bool {
    if wanted == installed {
        return true;
    }
    !wanted.contains(':') && installed == format!("{}:latest", wanted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_matches() {
        assert!(model_matches("llama3.1:8b", "llama3.1:8b"));
        assert!(model_matches("mistral", "mistral:latest"));
        assert!(!model_matches("mistral", "mistral:7b"));
        assert!(!model_matches("llama3.1:8b", "llama3.1:70b"));
    }

    #[test]
    fn test_request_shape() {
        let messages = vec![ChatMessage::user("hi")];
        let request = ChatRequest {
            model: "m",
            messages: &messages,
            stream: false,
            options: ChatOptions {
                temperature: 0.5,
                num_predict: 64,
            },
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["stream"], false);
        assert_eq!(value["messages"][0]["role"], "user");
        assert_eq!(value["options"]["num_predict"], 64);
    }
}
