//! Memory coordinator: per-agent stores plus an LRU cache of materialized
//! conversation contexts.
//!
//! Cache entries are keyed by `(agent id, max_turns)`. Writing a turn and
//! invalidating that agent's entries happen under the agent's write gate,
//! and cache misses rebuild under the same gate, so a stale context can
//! never be inserted after a write. Different agents never contend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tracing::{debug, info};

use thinkloop_core::agent::AgentIdentity;
use thinkloop_core::error::MemoryError;
use thinkloop_core::turn::{ConversationContext, Turn};

use crate::cache::{CacheStats, LruCache};
use crate::store::AgentMemoryStore;

pub const DEFAULT_CACHE_CAPACITY: usize = 100;

type CacheKey = (String, usize);

/// Aggregate memory figures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryStats {
    pub agents_with_memory: usize,
    pub total_turns: usize,
    pub cache: CacheStats,
}

pub struct MemoryCoordinator {
    stores: RwLock<HashMap<String, Arc<AgentMemoryStore>>>,
    cache: Mutex<LruCache<CacheKey, Arc<ConversationContext>>>,
}

impl MemoryCoordinator {
    pub fn new(cache_capacity: usize) -> Result<Self, MemoryError> {
        Ok(Self {
            stores: RwLock::new(HashMap::new()),
            cache: Mutex::new(LruCache::new(cache_capacity)?),
        })
    }

    fn cache(&self) -> std::sync::MutexGuard<'_, LruCache<CacheKey, Arc<ConversationContext>>> {
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The agent's store, created on first use.
    pub fn get_or_create_store(&self, identity: &AgentIdentity) -> Arc<AgentMemoryStore> {
        if let Some(store) = self.find_store(identity.id()) {
            return store;
        }
        let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
        stores
            .entry(identity.id().to_string())
            .or_insert_with(|| {
                debug!(agent_id = %identity.id(), agent = %identity.name(), "Created memory store");
                Arc::new(AgentMemoryStore::new(identity.clone()))
            })
            .clone()
    }

    /// The agent's store, if it exists.
    pub fn find_store(&self, agent_id: &str) -> Option<Arc<AgentMemoryStore>> {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores.get(agent_id).cloned()
    }

    /// The last `max_turns` turns of the agent, served from cache when possible.
    ///
    /// Two reads with no intervening write return the same snapshot.
    pub async fn get_conversation_context(
        &self,
        identity: &AgentIdentity,
        max_turns: usize,
    ) -> Arc<ConversationContext> {
        let key = (identity.id().to_string(), max_turns);
        loop {
            let store = self.get_or_create_store(identity);

            if let Some(context) = self.cache().get(&key) {
                store.touch();
                return context;
            }

            let _gate = store.lock().await;
            if !self.is_registered(&store) {
                continue;
            }
            // A concurrent miss may have filled the entry while we waited
            if let Some(context) = self.cache().peek(&key).cloned() {
                return context;
            }

            let context = Arc::new(ConversationContext::new(identity.clone(), store.last_n(max_turns)));
            self.cache().put(key, Arc::clone(&context));
            store.touch();
            debug!(agent_id = %identity.id(), max_turns, turns = context.turn_count(), "Materialized conversation context");
            return context;
        }
    }

    /// Append a turn and invalidate every cached context of the agent.
    pub async fn save_turn(&self, identity: &AgentIdentity, turn: Turn) -> Result<(), MemoryError> {
        let agent_id = identity.id();
        loop {
            let store = self.get_or_create_store(identity);
            let _gate = store.lock().await;
            // Evicted between lookup and gate: write to the replacement store.
            if !self.is_registered(&store) {
                debug!(agent_id, "Memory store was evicted before the write, retrying");
                continue;
            }

            store.append(turn);
            let invalidated = self.cache().retain(|(id, _)| id != agent_id);
            debug!(agent_id, invalidated, turns = store.len(), "Saved turn");
            return Ok(());
        }
    }

    /// Whether `store` is still the one held for its agent.
    ///
    /// Checked under the store's gate: cleanup skips gated stores, so the
    /// answer holds until the gate is released.
    fn is_registered(&self, store: &Arc<AgentMemoryStore>) -> bool {
        let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
        stores
            .get(store.identity().id())
            .is_some_and(|current| Arc::ptr_eq(current, store))
    }

    /// Evict stores (and their cache entries) untouched for longer than `threshold`.
    pub fn cleanup_inactive(&self, threshold: Duration) -> usize {
        let threshold = chrono::Duration::from_std(threshold).unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let cutoff = Utc::now()
            .checked_sub_signed(threshold)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.cleanup_inactive_before(cutoff)
    }

    /// Evict stores last touched before `cutoff`. Stores mid-write are kept.
    pub fn cleanup_inactive_before(&self, cutoff: DateTime<Utc>) -> usize {
        let removed: HashSet<String> = {
            let mut stores = self.stores.write().unwrap_or_else(|e| e.into_inner());
            let stale: Vec<String> = stores
                .iter()
                .filter(|(_, store)| store.last_touched() < cutoff && !store.is_busy())
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stale {
                stores.remove(id);
            }
            stale.into_iter().collect()
        };

        if !removed.is_empty() {
            self.cache().retain(|(id, _)| !removed.contains(id));
            info!(evicted = removed.len(), "Cleaned up inactive agent memory");
        }
        removed.len()
    }

    /// Drop everything held for one agent. Returns whether a store existed.
    pub fn clear_agent_memory(&self, agent_id: &str) -> bool {
        let existed = self
            .stores
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(agent_id)
            .is_some();
        self.cache().retain(|(id, _)| id != agent_id);
        existed
    }

    pub fn stats(&self) -> MemoryStats {
        let (agents_with_memory, total_turns) = {
            let stores = self.stores.read().unwrap_or_else(|e| e.into_inner());
            (stores.len(), stores.values().map(|s| s.len()).sum())
        };
        MemoryStats {
            agents_with_memory,
            total_turns,
            cache: self.cache().stats(),
        }
    }
}
