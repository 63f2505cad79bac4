//! # coop-core
//!
//! Core types for the Coop multi-agent software workflow.
//!
//! A run walks a fixed pipeline of reasoning roles (requirements, design,
//! code, test, review) and loops until a quality judge approves the result
//! or the iteration budget runs out.
//!
//! ## Contents
//!
//! - `Snapshot`, `IterationRecord`, `OrchestrationState`: the run data model
//! - `CoopConfig`: TOML configuration with defaults
//! - `CoopError`: one error type shared by every crate
//! - `fail_open`: helpers for side effects that must not abort a run

mod error;
mod types;

pub mod config;
pub mod fail_open;

pub use config::{
    builtin_profile, builtin_profiles, CompressionConfig, CoopConfig, GatewayConfig,
    ModelProfile, ModelSettings, PathsConfig, SandboxConfig, SandboxMode, ServiceConfig,
    WorkflowConfig,
};
pub use error::{CoopError, Result};
pub use types::*;
