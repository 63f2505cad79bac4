//! Coop CLI - multi-agent software workflow
//!
//! Usage:
//!   coop init [path]              Write a default .coop/config.toml
//!   coop run <prompt>...          Run the workflow on one or more requests
//!   coop runs                     List recorded runs
//!   coop profiles [name]          List built-in model profiles or show one
//!   coop serve-sandbox            Start the remote sandbox service

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use coop_agent::{Gateway, OllamaGateway};
use coop_core::{builtin_profile, builtin_profiles, CoopConfig, ModelProfile, SandboxMode};
use coop_orchestrator::{
    ConsoleApproval, JsonlRunStore, RunService, RunStatus, RunStore, RunSummary,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "coop")]
#[command(author, version, about = "Multi-agent software workflow")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Config file (defaults to .coop/config.toml when present)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration
    Init {
        /// Project path (defaults to current directory)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Run the workflow
    Run {
        /// Request text, or a path to a file holding it. Several requests run concurrently.
        #[arg(required = true)]
        prompts: Vec<String>,

        /// Override the iteration budget
        #[arg(short = 'n', long)]
        max_iterations: Option<usize>,

        /// Override the sandbox mode
        #[arg(long)]
        sandbox: Option<CliSandbox>,

        /// Ask for approval of each design on the console
        #[arg(long)]
        approve: bool,

        /// Built-in model profile to use for every role
        #[arg(short = 'P', long)]
        profile: Option<String>,
    },

    /// List recorded runs, newest first
    Runs {
        /// Maximum runs to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// List built-in model profiles, or show the models of one
    Profiles {
        name: Option<String>,
    },

    /// Serve the sandbox over HTTP
    ServeSandbox {
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        port: Option<u16>,

        /// Context root every instruction is confined to
        #[arg(long)]
        root: Option<PathBuf>,

        /// JSON-lines audit log
        #[arg(long, value_name = "FILE")]
        audit_log: Option<PathBuf>,
    },
}

/// CLI-friendly sandbox mode
#[derive(Debug, Clone, Copy, ValueEnum)]
enum CliSandbox {
    Disabled,
    Local,
    Remote,
}

impl From<CliSandbox> for SandboxMode {
    fn from(m: CliSandbox) -> Self {
        match m {
            CliSandbox::Disabled => SandboxMode::Disabled,
            CliSandbox::Local => SandboxMode::Local,
            CliSandbox::Remote => SandboxMode::Remote,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Commands::Init { path } => cmd_init(path),
        Commands::Run {
            prompts,
            max_iterations,
            sandbox,
            approve,
            profile,
        } => {
            let mut config = load_config(cli.config.as_deref())?;
            apply_run_overrides(&mut config, max_iterations, sandbox, approve, profile.as_deref())?;
            cmd_run(config, prompts).await
        }
        Commands::Runs { limit } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_runs(config, limit).await
        }
        Commands::Profiles { name } => cmd_profiles(name.as_deref()),
        Commands::ServeSandbox {
            host,
            port,
            root,
            audit_log,
        } => {
            let config = load_config(cli.config.as_deref())?;
            cmd_serve_sandbox(config, host, port, root, audit_log).await
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<CoopConfig> {
    match path {
        Some(path) => CoopConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => CoopConfig::load_or_default(Path::new(".")).context("Failed to load config"),
    }
}

fn cmd_init(path: PathBuf) -> Result<()> {
    info!("Initializing Coop in {:?}", path);

    let config_path = CoopConfig::write_default(&path).context("Failed to write config")?;

    println!("Initialized Coop in {:?}", path);
    println!("Created:");
    println!("  {}", config_path.display());
    println!("\nNext steps:");
    println!("  1. Point [gateway] base_url at your model server and pick models under [roles]");
    println!("  2. Run 'coop run \"<request>\"'");

    Ok(())
}

/// A prompt naming an existing file is replaced by the file's contents
fn resolve_prompt(prompt: &str) -> Result<String> {
    let path = Path::new(prompt);
    if path.is_file() {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {}", path.display()))
    } else {
        Ok(prompt.to_string())
    }
}

fn apply_run_overrides(
    config: &mut CoopConfig,
    max_iterations: Option<usize>,
    sandbox: Option<CliSandbox>,
    approve: bool,
    profile: Option<&str>,
) -> Result<()> {
    if let Some(name) = profile {
        config.apply_profile(name)?;
    }
    if let Some(n) = max_iterations {
        config.workflow.max_iterations = n;
    }
    if let Some(mode) = sandbox {
        config.sandbox.mode = mode.into();
    }
    if approve {
        config.workflow.enable_human_approval = true;
    }
    config.validate()?;
    Ok(())
}

async fn cmd_run(config: CoopConfig, prompts: Vec<String>) -> Result<()> {
    let inputs = prompts
        .iter()
        .map(|p| resolve_prompt(p))
        .collect::<Result<Vec<_>>>()?;

    let gateway: Arc<dyn Gateway> = Arc::new(
        OllamaGateway::from_config(&config.gateway).context("Failed to create gateway client")?,
    );

    info!(
        "Running {} request(s), sandbox {}, up to {} iterations, profile {}",
        inputs.len(),
        config.sandbox.mode,
        config.workflow.max_iterations,
        config.workflow.profile.as_deref().unwrap_or("custom")
    );

    let approval_enabled = config.workflow.enable_human_approval;
    let mut service = RunService::new(config, gateway);
    if approval_enabled {
        service = service.with_approval(Arc::new(ConsoleApproval::stdin()));
    }
    let service = Arc::new(service);

    let summaries = if inputs.len() == 1 {
        vec![service.start(&inputs[0]).await]
    } else {
        service.run_many(inputs).await
    };

    for summary in &summaries {
        print_summary(summary);
    }

    let failed = summaries
        .iter()
        .filter(|s| s.status == RunStatus::Failed)
        .count();
    if failed > 0 {
        bail!("{} of {} run(s) failed", failed, summaries.len());
    }
    Ok(())
}

fn print_summary(summary: &RunSummary) {
    println!("\nRun {}", summary.run_id);
    println!("==========");
    println!("  Status:           {}", summary.status);
    if let Some(reason) = summary.stop_reason {
        println!("  Stop reason:      {}", reason);
    }
    println!("  Iterations:       {}", summary.state.iteration_count);
    println!("  Stage executions: {}", summary.state.stage_executions);
    if let Some(record) = summary.state.latest_record() {
        println!(
            "  Final quality:    {:.2} (change {:.2}, {})",
            record.quality_score, record.change_magnitude, record.decision
        );
    }
    if let Some(location) = &summary.output_location {
        println!("  Deliverables:     {}", location.display());
    }
    if let Some(error) = &summary.error {
        println!("  Error:            {}", error);
    }
}

async fn cmd_runs(config: CoopConfig, limit: usize) -> Result<()> {
    let store = JsonlRunStore::new(config.paths.runs.clone());
    let runs = store.list().await.context("Failed to read run store")?;

    if runs.is_empty() {
        println!("No runs recorded in {}", store.path().display());
        return Ok(());
    }

    println!("Runs ({} total)", runs.len());
    println!("==========");
    for run in runs.iter().take(limit) {
        let quality = run
            .final_quality
            .map(|q| format!("{:.2}", q))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {:<9}  {}  iterations={} quality={}",
            run.run_id,
            run.status.to_string(),
            run.start_time.format("%Y-%m-%d %H:%M:%S"),
            run.iterations,
            quality
        );
        println!("    {}", run.input_summary.lines().next().unwrap_or_default());
        if let Some(error) = &run.error {
            println!("    error: {}", error);
        }
    }

    Ok(())
}

fn render_profile(profile: &ModelProfile) -> String {
    let mut out = format!("{}\n    {}\n", profile.name, profile.description);
    for (role, settings) in profile.roles() {
        out.push_str(&format!(
            "    {:<16} {} (temperature {:.2})\n",
            role, settings.model, settings.temperature
        ));
    }
    out
}

fn cmd_profiles(name: Option<&str>) -> Result<()> {
    match name {
        Some(name) => match builtin_profile(name) {
            Some(profile) => print!("{}", render_profile(&profile)),
            None => bail!("Unknown profile '{}'", name),
        },
        None => {
            println!("Profiles");
            println!("==========");
            for profile in builtin_profiles() {
                println!("{:<18} {}", profile.name, profile.description);
            }
            println!("\nSelect one with 'coop run --profile <name>' or [workflow] profile");
        }
    }
    Ok(())
}

async fn cmd_serve_sandbox(
    mut config: CoopConfig,
    host: Option<String>,
    port: Option<u16>,
    root: Option<PathBuf>,
    audit_log: Option<PathBuf>,
) -> Result<()> {
    let service = &mut config.service;
    if let Some(host) = host {
        service.host = host;
    }
    if let Some(port) = port {
        service.port = port;
    }
    if let Some(root) = root {
        service.root = root;
    }
    if let Some(audit_log) = audit_log {
        service.audit_log_path = audit_log;
    }

    coop_sandbox_service::serve(&config.service)
        .await
        .context("Sandbox service stopped")?;
    Ok(())
}
