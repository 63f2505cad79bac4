//! Configuration management for Coop
//!
//! This module provides the configuration for a workflow run: judge thresholds,
//! loop bounds, the sandbox, the sandbox service, and per-role model settings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::types::{Language, Role, RoleConfig};
use crate::{CoopError, Result};

/// Top-level Coop configuration
///
/// Loaded from `.coop/config.toml` in the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoopConfig {
    /// Loop bounds and judge thresholds
    #[serde(default)]
    pub workflow: WorkflowConfig,

    /// Distillation of oversized stage output
    #[serde(default)]
    pub compression: CompressionConfig,

    /// Reasoning gateway endpoint
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Execution sandbox used by the code and test stages
    #[serde(default)]
    pub sandbox: SandboxConfig,

    /// Remote sandbox service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Output locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Model settings keyed by role name
    #[serde(default = "default_roles")]
    pub roles: BTreeMap<String, ModelSettings>,
}

/// Loop bounds and judge thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowConfig {
    #[serde(default = "default_quality_threshold")]
    pub quality_threshold: f64,

    #[serde(default = "default_change_threshold")]
    pub change_threshold: f64,

    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Number of trailing records inspected for stagnation
    #[serde(default = "default_stagnation_window")]
    pub stagnation_window: usize,

    /// Stage executions allowed per iteration before the run is cut off
    #[serde(default = "default_ceiling_multiplier")]
    pub ceiling_multiplier: usize,

    #[serde(default)]
    pub enable_human_approval: bool,

    /// Language the code and test stages target
    #[serde(default)]
    pub language: Language,

    /// Built-in model profile applied over `[roles]` at load time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Character count above which stage output is distilled
    #[serde(default = "default_compression_threshold")]
    pub threshold: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub base_url: String,

    /// Per-call timeout
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,

    /// Concurrent calls allowed during batch evaluation
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
}

/// Which sandbox implementation a run uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SandboxMode {
    /// Code is generated directly by the programmer role
    #[default]
    Disabled,
    Local,
    Remote,
}

impl fmt::Display for SandboxMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxMode::Disabled => write!(f, "disabled"),
            SandboxMode::Local => write!(f, "local"),
            SandboxMode::Remote => write!(f, "remote"),
        }
    }
}

impl FromStr for SandboxMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "disabled" | "off" | "none" => Ok(SandboxMode::Disabled),
            "local" => Ok(SandboxMode::Local),
            "remote" => Ok(SandboxMode::Remote),
            _ => Err(format!(
                "Invalid sandbox mode: {}. Use disabled, local, or remote.",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    #[serde(default)]
    pub mode: SandboxMode,

    /// Parent directory for per-run local sandbox roots
    #[serde(default = "default_sandbox_root")]
    pub root: PathBuf,

    #[serde(default = "default_command_whitelist")]
    pub command_whitelist: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Upper bound on agent-tool loop steps
    #[serde(default = "default_agent_max_steps")]
    pub agent_max_steps: usize,

    /// Base URL of the remote sandbox service
    #[serde(default = "default_remote_url")]
    pub remote_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_service_host")]
    pub host: String,

    #[serde(default = "default_service_port")]
    pub port: u16,

    /// Context root every instruction is confined to
    #[serde(default = "default_service_root")]
    pub root: PathBuf,

    #[serde(default = "default_audit_log_path")]
    pub audit_log_path: PathBuf,

    #[serde(default = "default_command_whitelist")]
    pub command_whitelist: Vec<String>,

    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_deliverables_path")]
    pub deliverables: PathBuf,

    /// JSON-lines run store
    #[serde(default = "default_runs_path")]
    pub runs: PathBuf,

    /// Directory holding per-run activity logs
    #[serde(default = "default_activity_path")]
    pub activity: PathBuf,
}

/// Model settings for one role
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

// Default value providers
fn default_quality_threshold() -> f64 {
    0.7
}

fn default_change_threshold() -> f64 {
    0.05
}

fn default_max_iterations() -> usize {
    10
}

fn default_stagnation_window() -> usize {
    3
}

fn default_ceiling_multiplier() -> usize {
    10
}

fn default_compression_threshold() -> usize {
    1000
}

fn default_gateway_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_gateway_timeout() -> u64 {
    600
}

fn default_batch_concurrency() -> usize {
    4
}

fn default_sandbox_root() -> PathBuf {
    PathBuf::from("sandbox")
}

fn default_command_whitelist() -> Vec<String> {
    [
        "python",
        "python3",
        "node",
        "gcc",
        "ls",
        "cat",
        "./test_runner",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_command_timeout() -> u64 {
    30
}

fn default_agent_max_steps() -> usize {
    10
}

fn default_remote_url() -> String {
    "http://127.0.0.1:8000".to_string()
}

fn default_service_host() -> String {
    "127.0.0.1".to_string()
}

fn default_service_port() -> u16 {
    8000
}

fn default_service_root() -> PathBuf {
    PathBuf::from("sandbox_context")
}

fn default_audit_log_path() -> PathBuf {
    PathBuf::from("audit.jsonl")
}

fn default_deliverables_path() -> PathBuf {
    PathBuf::from("deliverables")
}

fn default_runs_path() -> PathBuf {
    PathBuf::from("runs/runs.jsonl")
}

fn default_activity_path() -> PathBuf {
    PathBuf::from("runs")
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_model_for(role: Role) -> ModelSettings {
    let (model, temperature, max_tokens) = match role {
        Role::Programmer => ("qwen2.5-coder:7b", 0.2, 4096),
        Role::Tester => ("qwen2.5-coder:7b", 0.2, 2048),
        Role::QualityGate => ("llama3.1:8b", 0.1, 512),
        Role::Distiller => ("llama3.1:8b", 0.3, 512),
        _ => ("llama3.1:8b", default_temperature(), 2048),
    };
    ModelSettings {
        model: model.to_string(),
        temperature,
        max_tokens,
    }
}

fn default_roles() -> BTreeMap<String, ModelSettings> {
    Role::ALL
        .iter()
        .map(|role| (role.key().to_string(), default_model_for(*role)))
        .collect()
}

/// A named set of per-role model choices
#[derive(Debug, Clone, PartialEq)]
pub struct ModelProfile {
    pub name: &'static str,
    pub description: &'static str,
    models: Vec<(Role, &'static str, f32)>,
}

impl ModelProfile {
    /// Model settings keyed by role name; token limits come from the role defaults
    pub fn roles(&self) -> BTreeMap<String, ModelSettings> {
        self.models
            .iter()
            .map(|(role, model, temperature)| {
                let settings = ModelSettings {
                    model: model.to_string(),
                    temperature: *temperature,
                    max_tokens: default_model_for(*role).max_tokens,
                };
                (role.key().to_string(), settings)
            })
            .collect()
    }
}

/// Profiles shipped with Coop
pub fn builtin_profiles() -> Vec<ModelProfile> {
    vec![
        ModelProfile {
            name: "high_reasoning",
            description: "Larger reasoning models for planning, a dedicated coder for code",
            models: vec![
                (Role::ProductManager, "gemma3:12b", 0.4),
                (Role::Architect, "phi4:14b", 0.2),
                (Role::Programmer, "qwen2.5-coder:latest", 0.1),
                (Role::Tester, "deepseek-coder:6.7b", 0.25),
                (Role::Reviewer, "gemma3:4b", 0.2),
                (Role::QualityGate, "gemma3:4b", 0.1),
                (Role::Reflector, "phi4:14b", 0.2),
                (Role::Distiller, "gemma3:1b", 0.2),
            ],
        },
        ModelProfile {
            name: "fast_lightweight",
            description: "Small models throughout for quick local iteration",
            models: vec![
                (Role::ProductManager, "gemma3:4b", 0.4),
                (Role::Architect, "gemma3:4b", 0.2),
                (Role::Programmer, "deepseek-coder:6.7b", 0.1),
                (Role::Tester, "neural-chat:latest", 0.2),
                (Role::Reviewer, "neural-chat:latest", 0.3),
                (Role::QualityGate, "gemma3:4b", 0.1),
                (Role::Reflector, "neural-chat:latest", 0.2),
                (Role::Distiller, "gemma3:4b", 0.2),
            ],
        },
    ]
}

/// Look up a built-in profile, ignoring case
pub fn builtin_profile(name: &str) -> Option<ModelProfile> {
    builtin_profiles()
        .into_iter()
        .find(|p| p.name.eq_ignore_ascii_case(name))
}

impl CoopConfig {
    /// Load configuration from `.coop/config.toml` or use defaults
    pub fn load_or_default(project_root: &Path) -> Result<Self> {
        let config_path = project_root.join(".coop/config.toml");

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load configuration from an explicit file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| CoopError::Config(format!("Failed to parse config file: {}", e)))?;
        if let Some(name) = config.workflow.profile.clone() {
            config.apply_profile(&name)?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Replace the model and temperature of every role the profile names
    ///
    /// Token limits already set under `[roles]` are kept.
    pub fn apply_profile(&mut self, name: &str) -> Result<()> {
        let profile = builtin_profile(name).ok_or_else(|| {
            let known: Vec<&str> = builtin_profiles().iter().map(|p| p.name).collect();
            CoopError::Config(format!(
                "Unknown profile '{}' (available: {})",
                name,
                known.join(", ")
            ))
        })?;

        for (key, settings) in profile.roles() {
            match self.roles.get_mut(&key) {
                Some(existing) => {
                    existing.model = settings.model;
                    existing.temperature = settings.temperature;
                }
                None => {
                    self.roles.insert(key, settings);
                }
            }
        }
        self.workflow.profile = Some(profile.name.to_string());
        Ok(())
    }

    /// Write default configuration to `.coop/config.toml`
    pub fn write_default(project_root: &Path) -> Result<PathBuf> {
        let config_dir = project_root.join(".coop");
        std::fs::create_dir_all(&config_dir)?;

        let config_path = config_dir.join("config.toml");
        let content = toml::to_string_pretty(&Self::default())
            .map_err(|e| CoopError::Config(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(&config_path, content)?;
        Ok(config_path)
    }

    /// Reject values the workflow cannot run with
    pub fn validate(&self) -> Result<()> {
        let w = &self.workflow;
        if !(0.0..=1.0).contains(&w.quality_threshold) {
            return Err(CoopError::Config(format!(
                "quality_threshold must be within [0, 1], got {}",
                w.quality_threshold
            )));
        }
        if !(0.0..=1.0).contains(&w.change_threshold) {
            return Err(CoopError::Config(format!(
                "change_threshold must be within [0, 1], got {}",
                w.change_threshold
            )));
        }
        if w.max_iterations == 0 {
            return Err(CoopError::Config(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if w.stagnation_window < 2 {
            return Err(CoopError::Config(
                "stagnation_window must be at least 2".to_string(),
            ));
        }
        if w.ceiling_multiplier == 0 {
            return Err(CoopError::Config(
                "ceiling_multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolve the model settings for a role, falling back to built-in defaults
    pub fn role_config(&self, role: Role) -> RoleConfig {
        let settings = self
            .roles
            .get(role.key())
            .cloned()
            .unwrap_or_else(|| default_model_for(role));
        RoleConfig {
            role,
            model: settings.model,
            temperature: settings.temperature,
            max_tokens: settings.max_tokens,
        }
    }

    /// Hard cap on stage executions for one run
    pub fn stage_ceiling(&self) -> usize {
        self.workflow
            .max_iterations
            .saturating_mul(self.workflow.ceiling_multiplier)
    }
}

impl Default for CoopConfig {
    fn default() -> Self {
        Self {
            workflow: WorkflowConfig::default(),
            compression: CompressionConfig::default(),
            gateway: GatewayConfig::default(),
            sandbox: SandboxConfig::default(),
            service: ServiceConfig::default(),
            paths: PathsConfig::default(),
            roles: default_roles(),
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            quality_threshold: default_quality_threshold(),
            change_threshold: default_change_threshold(),
            max_iterations: default_max_iterations(),
            stagnation_window: default_stagnation_window(),
            ceiling_multiplier: default_ceiling_multiplier(),
            enable_human_approval: false,
            language: Language::default(),
            profile: None,
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            threshold: default_compression_threshold(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_gateway_url(),
            timeout_secs: default_gateway_timeout(),
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            mode: SandboxMode::default(),
            root: default_sandbox_root(),
            command_whitelist: default_command_whitelist(),
            command_timeout_secs: default_command_timeout(),
            agent_max_steps: default_agent_max_steps(),
            remote_url: default_remote_url(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_service_host(),
            port: default_service_port(),
            root: default_service_root(),
            audit_log_path: default_audit_log_path(),
            command_whitelist: default_command_whitelist(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            deliverables: default_deliverables_path(),
            runs: default_runs_path(),
            activity: default_activity_path(),
        }
    }
}
