//! Unified error types for Coop

use thiserror::Error;

/// Unified error type for all Coop operations
#[derive(Error, Debug)]
pub enum CoopError {
    // Gateway errors
    #[error("Model '{model}' required for {role} is not available")]
    ModelUnavailable { model: String, role: String },

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("Gateway rate limit: {0}")]
    GatewayLimit(String),

    // Judge errors
    #[error("Judge error: {0}")]
    Judge(String),

    // Sandbox errors
    #[error("Path escapes sandbox root: {0}")]
    BoundaryViolation(String),

    #[error("Command not allowed: {0}")]
    CommandNotAllowed(String),

    #[error("Command timed out after {0} seconds")]
    Timeout(u64),

    #[error("Sandbox error: {0}")]
    Sandbox(String),

    #[error("Transport error: {0}")]
    Transport(String),

    // Orchestrator errors
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    #[error("Approval error: {0}")]
    Approval(String),

    // Persistence errors
    #[error("Run store error: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl CoopError {
    /// True when the gateway reported the role's model as unavailable
    pub fn is_unavailable(&self) -> bool {
        matches!(self, CoopError::ModelUnavailable { .. })
    }
}

/// Result type alias using CoopError
pub type Result<T> = std::result::Result<T, CoopError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_message_names_model_and_role() {
        let err = CoopError::ModelUnavailable {
            model: "llama3".to_string(),
            role: "architect".to_string(),
        };
        assert!(err.is_unavailable());
        assert_eq!(
            err.to_string(),
            "Model 'llama3' required for architect is not available"
        );
    }

    #[test]
    fn test_timeout_message() {
        assert_eq!(
            CoopError::Timeout(30).to_string(),
            "Command timed out after 30 seconds"
        );
        assert!(!CoopError::Timeout(30).is_unavailable());
    }
}
