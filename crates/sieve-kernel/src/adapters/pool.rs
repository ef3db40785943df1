//! # Sandbox Pool
//!
//! Bounded pool of compiled sandboxes for a single transformation version.
//!
//! - `idle + in_use` never exceeds `max_size`; a semaphore holds one
//!   permit per in-use sandbox and new sandboxes are only compiled when
//!   the idle queue is empty.
//! - Waiters are served in arrival order and give up after
//!   `acquire_timeout`.
//! - A sandbox that is not explicitly released goes back to no queue:
//!   dropping a [`SandboxLease`] disposes it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use sieve_core::{SieveError, SieveResult, TransformationVersion};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

use crate::adapters::instance::{InstanceSettings, SandboxInstance};
use crate::adapters::source_cache::SourceCache;
use crate::domain::{InstanceState, PoolPolicy, PoolSnapshot};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Factories
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Produces fresh sandboxes for one version
#[async_trait]
pub trait InstanceFactory: Send + Sync {
    fn version_id(&self) -> &str;

    async fn create(&self) -> SieveResult<SandboxInstance>;
}

/// Compiles sandboxes from source fetched through the [`SourceCache`]
pub struct VersionFactory {
    version_id: String,
    cache: Arc<SourceCache>,
    settings: InstanceSettings,
}

impl VersionFactory {
    pub fn new(version_id: impl Into<String>, cache: Arc<SourceCache>, settings: InstanceSettings) -> Self {
        Self {
            version_id: version_id.into(),
            cache,
            settings,
        }
    }
}

#[async_trait]
impl InstanceFactory for VersionFactory {
    fn version_id(&self) -> &str {
        &self.version_id
    }

    async fn create(&self) -> SieveResult<SandboxInstance> {
        let version = self.cache.get_version(&self.version_id).await?;
        SandboxInstance::spawn(version, &self.settings).await
    }
}

/// Compiles sandboxes from source supplied up front
pub struct StaticFactory {
    version: Arc<TransformationVersion>,
    settings: InstanceSettings,
}

impl StaticFactory {
    pub fn new(version: TransformationVersion, settings: InstanceSettings) -> Self {
        Self {
            version: Arc::new(version),
            settings,
        }
    }
}

#[async_trait]
impl InstanceFactory for StaticFactory {
    fn version_id(&self) -> &str {
        &self.version.id
    }

    async fn create(&self) -> SieveResult<SandboxInstance> {
        SandboxInstance::spawn(self.version.clone(), &self.settings).await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Pool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pool sizing and timing, taken from `SandboxConfig`
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub max_size: usize,
    pub acquire_timeout: Duration,
    pub max_idle_time: Duration,
}

impl From<&sieve_core::SandboxConfig> for PoolConfig {
    fn from(config: &sieve_core::SandboxConfig) -> Self {
        Self {
            max_size: config.max_pool_size,
            acquire_timeout: config.acquire_timeout(),
            max_idle_time: config.max_idle_time(),
        }
    }
}

struct PoolInner {
    version_id: String,
    factory: Arc<dyn InstanceFactory>,
    config: PoolConfig,
    idle: Mutex<VecDeque<SandboxInstance>>,
    slots: Arc<Semaphore>,
    in_use: AtomicUsize,
    closed: AtomicBool,
    created: AtomicU64,
    reused: AtomicU64,
    disposed: AtomicU64,
}

/// [Hexagonal Adapter] Per-version sandbox pool. Cheap to clone.
#[derive(Clone)]
pub struct SandboxPool {
    inner: Arc<PoolInner>,
}

impl SandboxPool {
    pub fn new(factory: Arc<dyn InstanceFactory>, config: PoolConfig) -> Self {
        let version_id = factory.version_id().to_string();
        debug!(
            "🏊 Pool for version {} initialized (max_size: {})",
            version_id, config.max_size
        );
        Self {
            inner: Arc::new(PoolInner {
                version_id,
                factory,
                slots: Arc::new(Semaphore::new(config.max_size)),
                config,
                idle: Mutex::new(VecDeque::new()),
                in_use: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                created: AtomicU64::new(0),
                reused: AtomicU64::new(0),
                disposed: AtomicU64::new(0),
            }),
        }
    }

    pub fn version_id(&self) -> &str {
        &self.inner.version_id
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// [Command] Obtain exclusive use of a sandbox
    ///
    /// Prefers an idle sandbox; compiles a new one when none is idle.
    /// Waits for a slot while the pool is full, up to `acquire_timeout`.
    pub async fn acquire(&self) -> SieveResult<SandboxLease> {
        let inner = &self.inner;
        if self.is_closed() {
            return Err(SieveError::SandboxUnavailable(format!(
                "pool for version {} is closed",
                inner.version_id
            )));
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(
            inner.config.acquire_timeout,
            inner.slots.clone().acquire_owned(),
        )
        .await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => {
                return Err(SieveError::SandboxUnavailable(format!(
                    "pool for version {} is closed",
                    inner.version_id
                )))
            }
            Err(_) => {
                warn!(
                    "⏳ Acquire timed out for version {} after {}ms",
                    inner.version_id,
                    started.elapsed().as_millis()
                );
                return Err(SieveError::AcquireTimeout {
                    version_id: inner.version_id.clone(),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
        };

        let mut instance = loop {
            if let Some(instance) = self.pop_idle() {
                inner.reused.fetch_add(1, Ordering::Relaxed);
                info!(
                    "♻️  Reusing warm sandbox {} for version {}",
                    instance.instance_id(),
                    inner.version_id
                );
                break instance;
            }

            let idle = inner.idle.lock().len();
            let in_use = inner.in_use.load(Ordering::Acquire);
            if PoolPolicy::can_create(idle, in_use, inner.config.max_size) {
                let instance = inner.factory.create().await?;
                inner.created.fetch_add(1, Ordering::Relaxed);
                break instance;
            }
            if idle == 0 {
                return Err(SieveError::Internal(format!(
                    "pool for version {} over capacity ({in_use} in use)",
                    inner.version_id
                )));
            }
            // A sandbox was released in between; take it instead
        };

        instance.advance(InstanceState::InUse)?;
        inner.in_use.fetch_add(1, Ordering::AcqRel);

        Ok(SandboxLease {
            instance: Some(instance),
            permit: Some(permit),
            pool: self.clone(),
        })
    }

    /// First live sandbox in the idle queue; dead ones are disposed on the way
    fn pop_idle(&self) -> Option<SandboxInstance> {
        let mut dead = Vec::new();
        let found = {
            let mut idle = self.inner.idle.lock();
            loop {
                match idle.pop_front() {
                    Some(instance) if instance.is_alive() => break Some(instance),
                    Some(instance) => dead.push(instance),
                    None => break None,
                }
            }
        };
        for instance in dead {
            self.discard(instance);
        }
        found
    }

    fn discard(&self, instance: SandboxInstance) {
        self.inner.disposed.fetch_add(1, Ordering::Relaxed);
        instance.dispose();
    }

    fn give_back(&self, mut instance: SandboxInstance, permit: Option<OwnedSemaphorePermit>) {
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);

        if self.is_closed() || !instance.is_alive() {
            self.discard(instance);
        } else if let Err(e) = instance.advance(InstanceState::Idle) {
            warn!("🛡️ {}", e);
            self.discard(instance);
        } else {
            debug!("↩️  Sandbox {} returned to pool", instance.instance_id());
            self.inner.idle.lock().push_back(instance);
        }

        // Slot frees only after the sandbox is back in the queue
        drop(permit);
    }

    fn retire(&self, instance: SandboxInstance, permit: Option<OwnedSemaphorePermit>) {
        self.inner.in_use.fetch_sub(1, Ordering::AcqRel);
        self.discard(instance);
        drop(permit);
    }

    /// [Command] Dispose idle sandboxes unused for longer than `max_idle_time`
    pub fn evict_idle(&self) -> usize {
        let max_idle = self.inner.config.max_idle_time;
        let expired: Vec<SandboxInstance> = {
            let mut idle = self.inner.idle.lock();
            let (expired, kept): (Vec<_>, Vec<_>) = idle
                .drain(..)
                .partition(|instance| PoolPolicy::should_evict(instance.last_used(), max_idle));
            idle.extend(kept);
            expired
        };

        let count = expired.len();
        for instance in expired {
            info!("🗑️  Evicted idle sandbox {}", instance.instance_id());
            self.discard(instance);
        }
        count
    }

    /// [Command] Stop handing out sandboxes and dispose the idle ones.
    ///
    /// Leases already out finish normally and are disposed on return.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.slots.close();

        let drained: Vec<SandboxInstance> = self.inner.idle.lock().drain(..).collect();
        let count = drained.len();
        for instance in drained {
            self.discard(instance);
        }
        info!(
            "🛑 Pool for version {} closed: {} idle sandboxes disposed",
            self.inner.version_id, count
        );
    }

    /// [Query] Point-in-time occupancy and lifetime counters
    pub fn snapshot(&self) -> PoolSnapshot {
        let inner = &self.inner;
        PoolSnapshot {
            version_id: inner.version_id.clone(),
            idle: inner.idle.lock().len(),
            in_use: inner.in_use.load(Ordering::Acquire),
            max_size: inner.config.max_size,
            created: inner.created.load(Ordering::Relaxed),
            reused: inner.reused.load(Ordering::Relaxed),
            disposed: inner.disposed.load(Ordering::Relaxed),
            closed: self.is_closed(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Lease
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// [RAII Guard] Exclusive use of one sandbox.
///
/// Settle it with [`SandboxLease::release`] or [`SandboxLease::dispose`];
/// a lease dropped unsettled disposes its sandbox.
pub struct SandboxLease {
    instance: Option<SandboxInstance>,
    permit: Option<OwnedSemaphorePermit>,
    pool: SandboxPool,
}

impl SandboxLease {
    pub fn version_id(&self) -> &str {
        self.pool.version_id()
    }

    pub fn instance(&self) -> SieveResult<&SandboxInstance> {
        self.instance
            .as_ref()
            .ok_or_else(|| SieveError::Internal("lease already settled".into()))
    }

    pub fn instance_mut(&mut self) -> SieveResult<&mut SandboxInstance> {
        self.instance
            .as_mut()
            .ok_or_else(|| SieveError::Internal("lease already settled".into()))
    }

    /// [Command] Return a healthy sandbox to the idle queue
    pub fn release(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.give_back(instance, self.permit.take());
        }
    }

    /// [Command] Terminate the sandbox and free its slot
    pub fn dispose(mut self) {
        if let Some(instance) = self.instance.take() {
            self.pool.retire(instance, self.permit.take());
        }
    }
}

impl Drop for SandboxLease {
    fn drop(&mut self) {
        if let Some(instance) = self.instance.take() {
            debug!(
                "🛡️ Lease for sandbox {} dropped unsettled; disposing",
                instance.instance_id()
            );
            self.pool.retire(instance, self.permit.take());
        }
    }
}

impl std::fmt::Debug for SandboxLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxLease")
            .field("version_id", &self.pool.version_id())
            .field("instance", &self.instance)
            .finish()
    }
}
