//! # Transform Engine
//!
//! The facade callers hold: one per process, owning the pool registry,
//! the source cache and the bridge counters.
//!
//! ```text
//! user_transform_handler ─► PoolRegistry ─► SandboxPool ─► ExecuteTransformation
//!                                 │
//!                                 └─► VersionFactory ─► SourceCache ─► SourceProvider
//! ```

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use once_cell::sync::OnceCell;
use serde::Serialize;
use serde_json::Value;
use sieve_core::{
    Event, ExecutionOutcome, FetchTransport, MetadataMap, SandboxConfig, SieveError, SieveResult,
    SourceProvider, TransformationVersion,
};
use tracing::info;

use crate::adapters::http::{HttpFetchTransport, HttpSourceProvider};
use crate::adapters::instance::{InstanceSettings, SandboxInstance};
use crate::adapters::pool::{PoolConfig, SandboxPool, StaticFactory};
use crate::adapters::registry::PoolRegistry;
use crate::adapters::source_cache::{SourceCache, SourceCacheStats};
use crate::domain::pool::{HealthStatus, PoolHealthCheck};
use crate::domain::{EntryPoint, PoolSnapshot};
use crate::kernel::commands::ExecuteTransformation;
use crate::ops::state::BridgeStatsSnapshot;
use crate::ops::BridgeCounters;

static GLOBAL: OnceCell<TransformEngine> = OnceCell::new();

/// Outcome counters across every version
#[derive(Debug, Default)]
struct OutcomeCounters {
    success: AtomicU64,
    runtime_error: AtomicU64,
    timeout: AtomicU64,
    resolution_error: AtomicU64,
}

impl OutcomeCounters {
    fn record(&self, outcome: &ExecutionOutcome) {
        let counter = match outcome {
            ExecutionOutcome::Success(_) => &self.success,
            ExecutionOutcome::RuntimeError(_) => &self.runtime_error,
            ExecutionOutcome::TimeoutError => &self.timeout,
            ExecutionOutcome::ResolutionError(_) => &self.resolution_error,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> OutcomeStats {
        OutcomeStats {
            success: self.success.load(Ordering::Relaxed),
            runtime_error: self.runtime_error.load(Ordering::Relaxed),
            timeout: self.timeout.load(Ordering::Relaxed),
            resolution_error: self.resolution_error.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutcomeStats {
    pub success: u64,
    pub runtime_error: u64,
    pub timeout: u64,
    pub resolution_error: u64,
}

/// [Query] result of [`TransformEngine::stats`]
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub outcomes: OutcomeStats,
    pub bridge: BridgeStatsSnapshot,
    pub sources: SourceCacheStats,
    pub pools: Vec<PoolSnapshot>,
}

pub struct TransformEngine {
    config: SandboxConfig,
    registry: PoolRegistry,
    cache: Arc<SourceCache>,
    settings: InstanceSettings,
    bridge: Arc<BridgeCounters>,
    outcomes: OutcomeCounters,
}

impl TransformEngine {
    pub fn new(
        config: SandboxConfig,
        provider: Arc<dyn SourceProvider>,
        transport: Arc<dyn FetchTransport>,
    ) -> SieveResult<Self> {
        config.validate()?;
        let max_versions = NonZeroUsize::new(config.max_versions)
            .ok_or_else(|| SieveError::Config("max_versions must be > 0".into()))?;

        let bridge = Arc::new(BridgeCounters::default());
        let settings = InstanceSettings {
            memory_limit_bytes: config.memory_limit_bytes(),
            init_timeout: config.execution_timeout(),
            transport,
            counters: bridge.clone(),
        };
        let cache = Arc::new(SourceCache::new(provider));
        let registry = PoolRegistry::new(
            max_versions,
            cache.clone(),
            settings.clone(),
            PoolConfig::from(&config),
        );

        info!(
            "🚀 Transform engine ready (heap: {}MB, budget: {}ms, pool: {}/version)",
            config.memory_limit_mb, config.execution_timeout_ms, config.max_pool_size
        );

        Ok(Self {
            config,
            registry,
            cache,
            settings,
            bridge,
            outcomes: OutcomeCounters::default(),
        })
    }

    /// Engine configured from the environment, talking to the config
    /// backend over HTTP
    pub fn from_env() -> SieveResult<Self> {
        let config = SandboxConfig::from_env()?;
        let provider = HttpSourceProvider::new(&config.config_backend_url)?;
        let transport = HttpFetchTransport::new()?;
        Self::new(config, Arc::new(provider), Arc::new(transport))
    }

    /// Process-wide engine, built from the environment on first use
    pub fn global() -> SieveResult<&'static TransformEngine> {
        GLOBAL.get_or_try_init(Self::from_env)
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    pub fn source_cache(&self) -> &Arc<SourceCache> {
        &self.cache
    }

    /// [Query] Pool for `version_id`, created on first use
    pub fn get_pool(&self, version_id: &str) -> SandboxPool {
        self.registry.get_pool(version_id)
    }

    /// [Command] Run `events` through the pooled sandboxes of `version_id`
    pub async fn execute_version(
        &self,
        version_id: &str,
        events: &[Event],
        metadata: Option<MetadataMap>,
    ) -> SieveResult<ExecutionOutcome> {
        let pool = self.get_pool(version_id);
        let outcome = ExecuteTransformation::new(&pool, &self.config)
            .run(events, metadata)
            .await?;
        self.outcomes.record(&outcome);
        Ok(outcome)
    }

    /// [Command] Transform a batch for an optional version.
    ///
    /// Without a version id the events pass through untouched.
    pub async fn user_transform_handler(
        &self,
        events: &[Event],
        version_id: Option<&str>,
    ) -> SieveResult<ExecutionOutcome> {
        match version_id {
            Some(version_id) => self.execute_version(version_id, events, None).await,
            None => {
                let passthrough = events
                    .iter()
                    .map(serde_json::to_value)
                    .collect::<Result<Vec<Value>, _>>()
                    .map_err(|e| SieveError::Internal(format!("batch serialization: {e}")))?;
                Ok(ExecutionOutcome::Success(passthrough))
            }
        }
    }

    /// [Command] Run ad-hoc source once in a throwaway sandbox
    pub async fn run_user_code(
        &self,
        events: &[Event],
        code: &str,
        library: Option<&str>,
        metadata: Option<MetadataMap>,
    ) -> SieveResult<ExecutionOutcome> {
        let version = adhoc_version(code, library);
        let pool_config = PoolConfig {
            max_size: 1,
            ..PoolConfig::from(&self.config)
        };
        let pool = SandboxPool::new(
            Arc::new(StaticFactory::new(version, self.settings.clone())),
            pool_config,
        );

        let result = ExecuteTransformation::new(&pool, &self.config)
            .run(events, metadata)
            .await;
        pool.close();

        let outcome = result?;
        self.outcomes.record(&outcome);
        Ok(outcome)
    }

    /// [Query] Compile `code` and report which entry point it exposes
    pub async fn check_code(&self, code: &str, library: Option<&str>) -> SieveResult<EntryPoint> {
        let version = Arc::new(adhoc_version(code, library));
        let instance = SandboxInstance::spawn(version, &self.settings).await?;
        let entry = instance.entry();
        instance.dispose();
        Ok(entry)
    }

    /// [Query] Occupancy of a registered pool
    pub fn pool_snapshot(&self, version_id: &str) -> Option<PoolSnapshot> {
        self.registry.snapshot(version_id)
    }

    /// [Query] Health of a registered pool
    pub fn pool_health(&self, version_id: &str) -> Option<HealthStatus> {
        self.pool_snapshot(version_id)
            .map(|snapshot| PoolHealthCheck::assess(&snapshot))
    }

    /// [Query] Engine-wide counters
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            outcomes: self.outcomes.snapshot(),
            bridge: self.bridge.snapshot(),
            sources: self.cache.stats(),
            pools: self.registry.snapshots(),
        }
    }

    /// [Command] Dispose idle sandboxes past `max_idle_time` in every pool
    pub fn evict_idle(&self) -> usize {
        let evicted = self.registry.evict_idle();
        if evicted > 0 {
            info!("🧹 Evicted {} idle sandboxes", evicted);
        }
        evicted
    }

    /// [System] Close every pool
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }
}

fn adhoc_version(code: &str, library: Option<&str>) -> TransformationVersion {
    let version = TransformationVersion::new(format!("adhoc-{}", uuid::Uuid::new_v4()), code);
    match library {
        Some(library) => version.with_library(library),
        None => version,
    }
}
