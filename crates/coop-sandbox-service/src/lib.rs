//! # coop-sandbox-service
//!
//! Remote side of the Coop sandbox: an axum server that accepts one
//! `SandboxInstruction` per request, runs it inside a confined root, and
//! writes every outcome to a JSON-lines audit log.
//!
//! ```text
//! POST /instruction   SandboxInstruction -> SandboxResult
//! GET  /health        {status, context, audit_failures}
//! ```

mod audit;
mod server;

pub use audit::{AuditLogger, AuditedRouter};
pub use server::{router, serve, serve_on, AppState, SharedState};
