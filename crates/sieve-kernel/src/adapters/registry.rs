//! Version-keyed registry of sandbox pools.
//!
//! Holds at most `max_versions` pools in LRU order. A pool pushed out of
//! the registry is closed: its idle sandboxes are disposed at once and
//! leases still out are disposed when they come back.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use tracing::info;

use crate::adapters::instance::InstanceSettings;
use crate::adapters::pool::{PoolConfig, SandboxPool, VersionFactory};
use crate::adapters::source_cache::SourceCache;
use crate::domain::PoolSnapshot;

pub struct PoolRegistry {
    pools: Mutex<LruCache<String, SandboxPool>>,
    cache: Arc<SourceCache>,
    settings: InstanceSettings,
    pool_config: PoolConfig,
}

impl PoolRegistry {
    pub fn new(
        max_versions: NonZeroUsize,
        cache: Arc<SourceCache>,
        settings: InstanceSettings,
        pool_config: PoolConfig,
    ) -> Self {
        Self {
            pools: Mutex::new(LruCache::new(max_versions)),
            cache,
            settings,
            pool_config,
        }
    }

    /// [Query] The pool for `version_id`, created on first use
    pub fn get_pool(&self, version_id: &str) -> SandboxPool {
        let (pool, evicted) = {
            let mut pools = self.pools.lock();
            if let Some(pool) = pools.get(version_id) {
                return pool.clone();
            }

            let factory = VersionFactory::new(version_id, self.cache.clone(), self.settings.clone());
            let pool = SandboxPool::new(Arc::new(factory), self.pool_config.clone());
            let evicted = pools.push(version_id.to_string(), pool.clone());
            (pool, evicted)
        };

        if let Some((evicted_id, evicted_pool)) = evicted {
            info!("🗑️  Pool for version {} evicted from registry", evicted_id);
            evicted_pool.close();
        }
        pool
    }

    /// [Query] Snapshot of a registered pool, without touching LRU order
    pub fn snapshot(&self, version_id: &str) -> Option<PoolSnapshot> {
        self.pools.lock().peek(version_id).map(SandboxPool::snapshot)
    }

    /// [Query] Snapshots of every registered pool, most recently used first
    pub fn snapshots(&self) -> Vec<PoolSnapshot> {
        self.pools.lock().iter().map(|(_, pool)| pool.snapshot()).collect()
    }

    pub fn len(&self) -> usize {
        self.pools.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.lock().is_empty()
    }

    /// [Command] Apply idle eviction to every pool
    pub fn evict_idle(&self) -> usize {
        let pools: Vec<SandboxPool> = self.pools.lock().iter().map(|(_, p)| p.clone()).collect();
        pools.iter().map(SandboxPool::evict_idle).sum()
    }

    /// [System] Close and forget every pool
    pub fn shutdown(&self) {
        let drained: Vec<SandboxPool> = {
            let mut pools = self.pools.lock();
            let mut drained = Vec::with_capacity(pools.len());
            while let Some((_, pool)) = pools.pop_lru() {
                drained.push(pool);
            }
            drained
        };
        info!("🛑 Pool registry shutdown: {} pools closed", drained.len());
        for pool in drained {
            pool.close();
        }
    }
}
