pub mod agents;
pub mod config_cmd;
pub mod init;
pub mod run;
pub mod tools;

use std::sync::Arc;

use thinkloop_agent::AgentRuntime;
use thinkloop_config::AppConfig;
use thinkloop_core::llm::LlmClient;

/// Load the config, failing with the usual prefix.
pub(crate) fn load_config() -> Result<AppConfig, Box<dyn std::error::Error>> {
    Ok(AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?)
}

/// Wire the model client, built-in tools and agents from `config`.
pub(crate) async fn build_runtime(config: &AppConfig) -> Result<AgentRuntime, Box<dyn std::error::Error>> {
    let registry = Arc::new(
        thinkloop_tools::default_registry(&config.tools)
            .map_err(|e| format!("Invalid tools workspace: {e}"))?,
    );
    tracing::debug!(
        workspace = %config.tools.resolved_workspace().display(),
        tools = registry.len(),
        "Registered built-in tools"
    );
    let llm: Arc<dyn LlmClient> = Arc::new(thinkloop_providers::client_from_config(config));
    Ok(AgentRuntime::from_config(config, llm, registry).await?)
}
