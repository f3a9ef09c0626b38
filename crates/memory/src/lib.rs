//! Per-agent conversational memory for thinkloop.
//!
//! - `AgentMemoryStore`: one append-only turn log per agent
//! - `LruCache`: bounded cache of materialized contexts
//! - `MemoryCoordinator`: stores + cache, invalidated on every write

pub mod cache;
pub mod coordinator;
pub mod store;

pub use cache::{CacheStats, LruCache};
pub use coordinator::{DEFAULT_CACHE_CAPACITY, MemoryCoordinator, MemoryStats};
pub use store::AgentMemoryStore;
