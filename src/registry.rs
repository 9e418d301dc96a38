//! src/registry.rs
//!
//! C4: the process-wide pool registry. Keyed by `(name, partition)`, each
//! entry is an independently lockable `Pool` so the membership fetcher, the
//! metrics collector, the score calculator and the HTTP surface can all make
//! progress on different pools concurrently. Constructed explicitly (never a
//! global/`static`) so tests can build an isolated registry per case.

use std::sync::Arc;
use tokio::sync::RwLock;

use dashmap::DashMap;

use crate::types::{Pool, PoolKey};

/// Shared, independently-lockable handle to a pool.
pub type PoolHandle = Arc<RwLock<Pool>>;

/// Registry of all known pools, keyed by `(name, partition)`.
#[derive(Default, Clone)]
pub struct PoolRegistry {
    pools: Arc<DashMap<PoolKey, PoolHandle>>,
}

impl PoolRegistry {
    pub fn new() -> Self {
        Self {
            pools: Arc::new(DashMap::new()),
        }
    }

    /// Insert a freshly constructed pool, or replace the handle for a key
    /// that already exists. Returns the handle either way.
    pub fn upsert(&self, pool: Pool) -> PoolHandle {
        let key = pool.key.clone();
        let handle: PoolHandle = Arc::new(RwLock::new(pool));
        self.pools.insert(key, handle.clone());
        handle
    }

    pub fn get(&self, key: &PoolKey) -> Option<PoolHandle> {
        self.pools.get(key).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, key: &PoolKey) -> Option<PoolHandle> {
        self.pools.remove(key).map(|(_, handle)| handle)
    }

    pub fn keys(&self) -> Vec<PoolKey> {
        self.pools.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn handles(&self) -> Vec<(PoolKey, PoolHandle)> {
        self.pools
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    /// Remove every key not present in `desired` (used by the hot-reload
    /// controller when a pool is deleted from configuration).
    pub fn retain_only(&self, desired: &[PoolKey]) {
        let desired_set: std::collections::HashSet<&PoolKey> = desired.iter().collect();
        let stale: Vec<PoolKey> = self
            .pools
            .iter()
            .filter(|entry| !desired_set.contains(entry.key()))
            .map(|entry| entry.key().clone())
            .collect();
        for key in stale {
            self.pools.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EngineType;

    fn sample_pool(name: &str) -> Pool {
        Pool::new(PoolKey::new(name, "Common"), EngineType::Vllm, Vec::new())
    }

    #[tokio::test]
    async fn upsert_and_get_roundtrip() {
        let registry = PoolRegistry::new();
        registry.upsert(sample_pool("alpha"));
        let handle = registry.get(&PoolKey::new("alpha", "Common")).unwrap();
        assert_eq!(handle.read().await.name(), "alpha");
    }

    #[test]
    fn remove_drops_entry() {
        let registry = PoolRegistry::new();
        registry.upsert(sample_pool("alpha"));
        assert!(registry.remove(&PoolKey::new("alpha", "Common")).is_some());
        assert!(registry.get(&PoolKey::new("alpha", "Common")).is_none());
    }

    #[test]
    fn retain_only_drops_stale_pools() {
        let registry = PoolRegistry::new();
        registry.upsert(sample_pool("alpha"));
        registry.upsert(sample_pool("beta"));
        registry.retain_only(&[PoolKey::new("alpha", "Common")]);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&PoolKey::new("beta", "Common")).is_some());
    }
}
