//! Per-agent append-only turn log.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use thinkloop_core::agent::AgentIdentity;
use thinkloop_core::turn::Turn;

/// One agent's turns, oldest first.
///
/// Turns are only ever appended. The write gate serializes multi-step
/// updates (append plus cache invalidation) for this agent alone.
#[derive(Debug)]
pub struct AgentMemoryStore {
    identity: AgentIdentity,
    turns: RwLock<Vec<Turn>>,
    last_touched: Mutex<DateTime<Utc>>,
    gate: AsyncMutex<()>,
}

impl AgentMemoryStore {
    pub fn new(identity: AgentIdentity) -> Self {
        Self {
            identity,
            turns: RwLock::new(Vec::new()),
            last_touched: Mutex::new(Utc::now()),
            gate: AsyncMutex::new(()),
        }
    }

    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    pub fn append(&self, turn: Turn) {
        self.turns.write().unwrap_or_else(|e| e.into_inner()).push(turn);
        self.touch();
    }

    /// The most recent `n` turns in insertion order.
    pub fn last_n(&self, n: usize) -> Vec<Turn> {
        let turns = self.turns.read().unwrap_or_else(|e| e.into_inner());
        let start = turns.len().saturating_sub(n);
        turns[start..].to_vec()
    }

    pub fn all(&self) -> Vec<Turn> {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn last_turn(&self) -> Option<Turn> {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).last().cloned()
    }

    pub fn len(&self) -> usize {
        self.turns.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn last_touched(&self) -> DateTime<Utc> {
        *self.last_touched.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn touch(&self) {
        *self.last_touched.lock().unwrap_or_else(|e| e.into_inner()) = Utc::now();
    }

    /// Take the per-agent write gate.
    pub(crate) async fn lock(&self) -> MutexGuard<'_, ()> {
        self.gate.lock().await
    }

    /// Whether someone currently holds the write gate.
    pub(crate) fn is_busy(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    #[cfg(test)]
    pub(crate) fn set_last_touched(&self, at: DateTime<Utc>) {
        *self.last_touched.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }
}
