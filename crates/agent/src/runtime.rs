//! Wiring a ready-to-use execution service from configuration.

use std::sync::Arc;

use tracing::{info, warn};

use thinkloop_config::AppConfig;
use thinkloop_core::agent::{AgentRepository, RegisteredAgent};
use thinkloop_core::event::EventBus;
use thinkloop_core::llm::LlmClient;
use thinkloop_core::tool::ToolRegistry;
use thinkloop_memory::MemoryCoordinator;

use crate::loop_runner::{AgentLoop, LoopSettings};
use crate::repository::InMemoryAgentRepository;
use crate::service::ExecutionService;

/// The shared services behind every execution.
pub struct AgentRuntime {
    pub service: ExecutionService,
    pub repository: Arc<InMemoryAgentRepository>,
    pub memory: Arc<MemoryCoordinator>,
    pub registry: Arc<ToolRegistry>,
    pub event_bus: Arc<EventBus>,
}

impl AgentRuntime {
    /// Build the runtime and register every agent the config defines.
    pub async fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        registry: Arc<ToolRegistry>,
    ) -> thinkloop_core::Result<Self> {
        let memory = Arc::new(MemoryCoordinator::new(config.memory.cache_capacity)?);
        let event_bus = Arc::new(EventBus::default());
        let repository = Arc::new(InMemoryAgentRepository::new());

        for definition in config.agent_definitions() {
            let capabilities = definition.to_capabilities(config)?;
            for tool in &capabilities.authorized_tools {
                if !registry.contains(tool) {
                    warn!(agent = %definition.name, tool = %tool, "Agent is authorized for a tool that is not registered");
                }
            }
            repository
                .save(RegisteredAgent::create(&definition.name, capabilities)?)
                .await?;
        }

        let agent_loop = AgentLoop::new(llm, Arc::clone(&memory), Arc::clone(&registry), Arc::clone(&event_bus))
            .with_settings(LoopSettings::from_config(config))
            .with_tool_timeout(config.tools.tool_timeout());

        let service = ExecutionService::new(repository.clone(), Arc::new(agent_loop))
            .with_default_timeout(config.execution_timeout());

        info!(
            agents = repository.count().await,
            tools = registry.len(),
            model = %config.default_model,
            "Agent runtime ready"
        );

        Ok(Self {
            service,
            repository,
            memory,
            registry,
            event_bus,
        })
    }
}
