//! # Source Cache
//!
//! Memoizes transformation and library source by version id.
//!
//! A version id is immutable upstream (editing a transformation mints a
//! new id), so entries never expire. Only successful fetches are stored;
//! concurrent misses on the same id share a single in-flight fetch.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use serde::Serialize;
use sieve_core::{LibraryCode, SieveError, SieveResult, SourceProvider, TransformationCode, TransformationVersion};
use tokio::sync::OnceCell;
use tracing::{debug, error};

/// Fetch counters, split by record kind
#[derive(Debug, Default)]
struct FetchCounters {
    hits: AtomicU64,
    success: AtomicU64,
    error: AtomicU64,
}

impl FetchCounters {
    fn snapshot(&self) -> FetchStats {
        FetchStats {
            hits: self.hits.load(Ordering::Relaxed),
            success: self.success.load(Ordering::Relaxed),
            error: self.error.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FetchStats {
    pub hits: u64,
    pub success: u64,
    pub error: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceCacheStats {
    pub transformations: FetchStats,
    pub libraries: FetchStats,
}

/// [Hexagonal Adapter] Memoizing front for a [`SourceProvider`]
pub struct SourceCache {
    provider: Arc<dyn SourceProvider>,
    transformations: DashMap<String, Arc<OnceCell<TransformationCode>>>,
    libraries: DashMap<String, Arc<OnceCell<LibraryCode>>>,
    transformation_counters: FetchCounters,
    library_counters: FetchCounters,
}

impl SourceCache {
    pub fn new(provider: Arc<dyn SourceProvider>) -> Self {
        Self {
            provider,
            transformations: DashMap::new(),
            libraries: DashMap::new(),
            transformation_counters: FetchCounters::default(),
            library_counters: FetchCounters::default(),
        }
    }

    /// [Query] Transformation source for `version_id`
    pub async fn get_transformation(&self, version_id: &str) -> SieveResult<TransformationCode> {
        let cell = self
            .transformations
            .entry(version_id.to_string())
            .or_default()
            .clone();

        if let Some(code) = cell.get() {
            self.transformation_counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(code.clone());
        }

        let code = cell
            .get_or_try_init(|| async {
                let started = Instant::now();
                let fetched = self
                    .provider
                    .get_transformation_code(version_id)
                    .await
                    .and_then(|code| check_version(version_id, code));
                match fetched {
                    Ok(code) => {
                        self.transformation_counters.success.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "📥 Fetched transformation {} in {}ms",
                            version_id,
                            started.elapsed().as_millis()
                        );
                        Ok(code)
                    }
                    Err(e) => {
                        self.transformation_counters.error.fetch_add(1, Ordering::Relaxed);
                        error!("💥 Fetching transformation {} failed: {}", version_id, e);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(code.clone())
    }

    /// [Query] Library source for `version_id`
    pub async fn get_library(&self, version_id: &str) -> SieveResult<LibraryCode> {
        let cell = self.libraries.entry(version_id.to_string()).or_default().clone();

        if let Some(code) = cell.get() {
            self.library_counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(code.clone());
        }

        let code = cell
            .get_or_try_init(|| async {
                let started = Instant::now();
                match self.provider.get_library_code(version_id).await {
                    Ok(code) => {
                        self.library_counters.success.fetch_add(1, Ordering::Relaxed);
                        debug!(
                            "📥 Fetched library {} in {}ms",
                            version_id,
                            started.elapsed().as_millis()
                        );
                        Ok(code)
                    }
                    Err(e) => {
                        self.library_counters.error.fetch_add(1, Ordering::Relaxed);
                        error!("💥 Fetching library {} failed: {}", version_id, e);
                        Err(e)
                    }
                }
            })
            .await?;
        Ok(code.clone())
    }

    /// [Query] Transformation plus its libraries, ready to compile
    pub async fn get_version(&self, version_id: &str) -> SieveResult<Arc<TransformationVersion>> {
        let transformation = self.get_transformation(version_id).await?;

        let mut libraries = Vec::with_capacity(transformation.library_version_ids.len());
        for library_id in &transformation.library_version_ids {
            libraries.push(self.get_library(library_id).await?);
        }

        Ok(Arc::new(TransformationVersion::assemble(version_id, transformation, &libraries)))
    }

    /// [Query] Hit and fetch counters
    pub fn stats(&self) -> SourceCacheStats {
        SourceCacheStats {
            transformations: self.transformation_counters.snapshot(),
            libraries: self.library_counters.snapshot(),
        }
    }
}

/// The backend must answer with the version that was asked for
fn check_version(requested: &str, code: TransformationCode) -> SieveResult<TransformationCode> {
    if code.version_id == requested {
        return Ok(code);
    }
    Err(SieveError::SourceFetch {
        version_id: requested.to_string(),
        message: format!("backend returned version {}", code.version_id),
    })
}
