//! Process-local agent repository.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use thinkloop_core::agent::{AgentRepository, RegisteredAgent};
use thinkloop_core::error::AgentError;

/// Agents kept in a map keyed by id. Lookups hand out clones.
#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<String, RegisteredAgent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted_by_name(mut agents: Vec<RegisteredAgent>) -> Vec<RegisteredAgent> {
    agents.sort_by(|a, b| a.name().cmp(b.name()));
    agents
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn find_by_id(&self, id: &str) -> Option<RegisteredAgent> {
        self.agents.read().await.get(id).cloned()
    }

    async fn find_by_name(&self, name: &str) -> Option<RegisteredAgent> {
        self.agents.read().await.values().find(|a| a.name() == name).cloned()
    }

    async fn save(&self, agent: RegisteredAgent) -> Result<(), AgentError> {
        let mut agents = self.agents.write().await;
        if agents.values().any(|a| a.name() == agent.name() && a.id() != agent.id()) {
            return Err(AgentError::DuplicateName(agent.name().to_string()));
        }
        debug!(agent_id = %agent.id(), agent = %agent.name(), "Saved agent");
        agents.insert(agent.id().to_string(), agent);
        Ok(())
    }

    async fn find_all(&self) -> Vec<RegisteredAgent> {
        sorted_by_name(self.agents.read().await.values().cloned().collect())
    }

    async fn find_active(&self) -> Vec<RegisteredAgent> {
        sorted_by_name(
            self.agents
                .read()
                .await
                .values()
                .filter(|a| a.is_active())
                .cloned()
                .collect(),
        )
    }

    async fn delete(&self, id: &str) -> bool {
        self.agents.write().await.remove(id).is_some()
    }

    async fn count(&self) -> usize {
        self.agents.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use thinkloop_core::agent::AgentCapabilities;

    fn agent(name: &str) -> RegisteredAgent {
        let caps = AgentCapabilities::new(
            "An agent stored by repository tests",
            "You are a test agent.",
            vec!["read_file".into()],
        )
        .unwrap();
        RegisteredAgent::create(name, caps).unwrap()
    }

    #[tokio::test]
    async fn save_and_find() {
        let repo = InMemoryAgentRepository::new();
        let a = agent("reader");
        repo.save(a.clone()).await.unwrap();

        assert_eq!(repo.find_by_id(a.id()).await.unwrap().name(), "reader");
        assert_eq!(repo.find_by_name("reader").await.unwrap().id(), a.id());
        assert!(repo.find_by_id("missing").await.is_none());
        assert_eq!(repo.count().await, 1);
    }

    #[tokio::test]
    async fn names_are_unique_across_agents() {
        let repo = InMemoryAgentRepository::new();
        repo.save(agent("reader")).await.unwrap();
        let err = repo.save(agent("reader")).await.unwrap_err();
        assert!(matches!(err, AgentError::DuplicateName(name) if name == "reader"));
    }

    #[tokio::test]
    async fn saving_again_updates() {
        let repo = InMemoryAgentRepository::new();
        let mut a = agent("reader");
        repo.save(a.clone()).await.unwrap();

        a.deactivate();
        repo.save(a.clone()).await.unwrap();

        assert_eq!(repo.count().await, 1);
        assert!(!repo.find_by_id(a.id()).await.unwrap().is_active());
    }

    #[tokio::test]
    async fn find_active_skips_inactive() {
        let repo = InMemoryAgentRepository::new();
        let mut sleeper = agent("sleeper");
        sleeper.deactivate();
        repo.save(sleeper).await.unwrap();
        repo.save(agent("worker")).await.unwrap();
        repo.save(agent("analyst")).await.unwrap();

        let active: Vec<_> = repo.find_active().await.iter().map(|a| a.name().to_string()).collect();
        assert_eq!(active, vec!["analyst", "worker"]);
        assert_eq!(repo.find_all().await.len(), 3);
    }

    #[tokio::test]
    async fn delete_removes() {
        let repo = InMemoryAgentRepository::new();
        let a = agent("reader");
        repo.save(a.clone()).await.unwrap();
        assert!(repo.delete(a.id()).await);
        assert!(!repo.delete(a.id()).await);
        assert_eq!(repo.count().await, 0);
    }
}
