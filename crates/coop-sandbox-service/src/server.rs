//! Axum server for the sandbox service

use crate::audit::{AuditLogger, AuditedRouter};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use coop_core::{CoopError, Result, ServiceConfig};
use coop_sandbox::{InstructionHandler, InstructionRouter, SandboxInstruction, SandboxResult};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

/// Shared service state
pub struct AppState {
    pub router: AuditedRouter<InstructionRouter>,
    /// Instructions run one at a time against the shared root
    gate: Mutex<()>,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    pub fn new(router: AuditedRouter<InstructionRouter>) -> Self {
        Self {
            router,
            gate: Mutex::new(()),
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Result<Self> {
        let router = InstructionRouter::at_root(
            &config.root,
            config.command_whitelist.clone(),
            config.command_timeout_secs,
        )?;
        let logger = Arc::new(AuditLogger::new(config.audit_log_path.clone()));
        Ok(Self::new(AuditedRouter::new(router, logger)))
    }
}

/// Routes for the service
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/instruction", post(process_instruction))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Serve on an already bound listener until the task is dropped
pub async fn serve_on(listener: TcpListener, state: SharedState) -> Result<()> {
    axum::serve(listener, router(state))
        .await
        .map_err(|e| CoopError::Transport(e.to_string()))
}

/// Bind the configured address and serve
pub async fn serve(config: &ServiceConfig) -> Result<()> {
    let state = Arc::new(AppState::from_config(config)?);
    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;

    info!(
        "Sandbox service listening on {} (root {}, audit log {})",
        addr,
        state.router.inner().root().display(),
        config.audit_log_path.display()
    );
    serve_on(listener, state).await
}

/// POST /instruction
async fn process_instruction(
    State(app): State<SharedState>,
    body: Bytes,
) -> (StatusCode, Json<SandboxResult>) {
    let instruction = match serde_json::from_slice::<SandboxInstruction>(&body) {
        Ok(instruction) => instruction,
        Err(e) => {
            warn!("Rejected malformed instruction: {}", e);
            let result = SandboxResult::error(format!("Invalid instruction: {}", e));
            let placeholder = SandboxInstruction {
                action: "invalid".to_string(),
                target: "instruction".to_string(),
                intent: Some(String::from_utf8_lossy(&body).chars().take(200).collect()),
                ..Default::default()
            };
            app.router.audit(&placeholder, &result).await;
            return (StatusCode::BAD_REQUEST, Json(result));
        }
    };

    let _guard = app.gate.lock().await;
    let result = app.router.handle(&instruction).await;
    (StatusCode::OK, Json(result))
}

/// GET /health
async fn health(State(app): State<SharedState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "context": app.router.inner().root().display().to_string(),
        "audit_failures": app.router.logger().failures(),
    }))
}
