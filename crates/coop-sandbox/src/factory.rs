use crate::local::LocalSandbox;
use crate::remote::RemoteSandbox;
use crate::sandbox::Sandbox;
use coop_agent::Gateway;
use coop_core::{CoopConfig, Result, SandboxMode};
use std::sync::Arc;

/// Build the sandbox selected by `config.sandbox.mode`
///
/// Local sandboxes get a directory per run under the configured root.
/// Returns `None` when sandboxing is disabled.
pub fn build_sandbox(
    config: &CoopConfig,
    run_id: &str,
    gateway: Arc<dyn Gateway>,
) -> Result<Option<Arc<dyn Sandbox>>> {
    let sandbox: Arc<dyn Sandbox> = match config.sandbox.mode {
        SandboxMode::Disabled => return Ok(None),
        SandboxMode::Local => {
            let root = config.sandbox.root.join(run_id);
            Arc::new(LocalSandbox::from_config(&root, config, gateway)?)
        }
        SandboxMode::Remote => Arc::new(RemoteSandbox::from_config(config, gateway)?),
    };
    Ok(Some(sandbox))
}
