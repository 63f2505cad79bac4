//! The reasoning gateway seam

use async_trait::async_trait;
use coop_core::{ChatMessage, Result, RoleConfig};
use std::sync::Arc;

/// Text generation for one role
///
/// Implementations return `CoopError::ModelUnavailable` when the role's model
/// cannot be served. Callers treat that as a degraded stage rather than a
/// failed run. Any other error is a transient call failure.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn generate(&self, role: &RoleConfig, messages: &[ChatMessage]) -> Result<String>;
}

#[async_trait]
impl<G: Gateway + ?Sized> Gateway for Arc<G> {
    async fn generate(&self, role: &RoleConfig, messages: &[ChatMessage]) -> Result<String> {
        (**self).generate(role, messages).await
    }
}
