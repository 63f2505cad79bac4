//! Bounded concurrent fan-out over a gateway
//!
//! Every request gets its own slot in the output. A failed call fills its slot
//! with the error and never cancels its siblings.

use crate::gateway::Gateway;
use coop_core::{ChatMessage, Result, RoleConfig};
use futures::stream::{self, StreamExt};
use tracing::debug;

/// One call in a batch
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub role: RoleConfig,
    pub messages: Vec<ChatMessage>,
}

/// Run `requests` with at most `concurrency` calls in flight
///
/// Results come back in request order.
pub async fn batch_generate<G>(
    gateway: &G,
    requests: &[BatchRequest],
    concurrency: usize,
) -> Vec<Result<String>>
where
    G: Gateway + ?Sized,
{
    let limit = concurrency.max(1);
    debug!("Batch of {} calls, {} in flight", requests.len(), limit);

    stream::iter(requests.iter())
        .map(|req| gateway.generate(&req.role, &req.messages))
        .buffered(limit)
        .collect()
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedGateway;
    use coop_core::Role;

    fn request(role: Role, text: &str) -> BatchRequest {
        BatchRequest {
            role: RoleConfig {
                role,
                model: "m".to_string(),
                temperature: 0.0,
                max_tokens: 16,
            },
            messages: vec![ChatMessage::user(text)],
        }
    }

    #[tokio::test]
    async fn test_failed_slot_does_not_cancel_siblings() {
        let gateway = ScriptedGateway::new();
        gateway.push(Role::QualityGate, "first");
        gateway.push_error(Role::QualityGate, "connection reset");
        gateway.push(Role::QualityGate, "third");

        let requests = vec![
            request(Role::QualityGate, "a"),
            request(Role::QualityGate, "b"),
            request(Role::QualityGate, "c"),
        ];
        let results = batch_generate(&gateway, &requests, 1).await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap(), "first");
        assert!(results[1].is_err());
        assert_eq!(results[2].as_ref().unwrap(), "third");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let gateway = ScriptedGateway::new();
        let results = batch_generate(&gateway, &[], 4).await;
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn test_order_preserved_with_parallelism() {
        let gateway = ScriptedGateway::new();
        gateway.always(Role::Reviewer, "ok");
        let requests: Vec<_> = (0..6)
            .map(|i| request(Role::Reviewer, &i.to_string()))
            .collect();
        let results = batch_generate(&gateway, &requests, 3).await;
        assert!(results.iter().all(|r| r.as_deref().ok() == Some("ok")));
        assert_eq!(gateway.calls_for(Role::Reviewer), 6);
    }
}
