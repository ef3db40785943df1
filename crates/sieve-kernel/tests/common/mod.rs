//! Shared fixtures: in-memory collaborators and a small-budget engine.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use sieve_core::traits::TransportError;
use sieve_core::{
    Event, FetchTransport, LibraryCode, SandboxConfig, SieveError, SieveResult, SourceProvider,
    TransformationCode,
};
use sieve_kernel::{HttpFetchTransport, TransformEngine};

/// Source service backed by a map, counting every lookup
#[derive(Default)]
pub struct InMemorySources {
    transformations: Mutex<HashMap<String, TransformationCode>>,
    libraries: Mutex<HashMap<String, LibraryCode>>,
    pub transformation_fetches: AtomicUsize,
    pub library_fetches: AtomicUsize,
}

impl InMemorySources {
    pub fn with(version_id: &str, code: &str) -> Arc<Self> {
        let sources = Arc::new(Self::default());
        sources.add(version_id, code, &[]);
        sources
    }

    pub fn add(&self, version_id: &str, code: &str, libraries: &[&str]) {
        self.transformations.lock().insert(
            version_id.to_string(),
            TransformationCode {
                version_id: version_id.to_string(),
                code: code.to_string(),
                library_version_ids: libraries.iter().map(|s| s.to_string()).collect(),
            },
        );
    }

    pub fn add_library(&self, version_id: &str, code: &str) {
        self.libraries.lock().insert(
            version_id.to_string(),
            LibraryCode {
                version_id: version_id.to_string(),
                code: code.to_string(),
            },
        );
    }

    pub fn fetches(&self) -> usize {
        self.transformation_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceProvider for InMemorySources {
    async fn get_transformation_code(&self, version_id: &str) -> SieveResult<TransformationCode> {
        self.transformation_fetches.fetch_add(1, Ordering::SeqCst);
        self.transformations
            .lock()
            .get(version_id)
            .cloned()
            .ok_or_else(|| SieveError::SourceFetch {
                version_id: version_id.to_string(),
                message: "404 Not Found".into(),
            })
    }

    async fn get_library_code(&self, version_id: &str) -> SieveResult<LibraryCode> {
        self.library_fetches.fetch_add(1, Ordering::SeqCst);
        self.libraries
            .lock()
            .get(version_id)
            .cloned()
            .ok_or_else(|| SieveError::SourceFetch {
                version_id: version_id.to_string(),
                message: "404 Not Found".into(),
            })
    }
}

/// Transport that answers every request with the URL it was asked for
#[derive(Default)]
pub struct EchoTransport {
    pub calls: AtomicUsize,
}

#[async_trait]
impl FetchTransport for EchoTransport {
    async fn fetch_json(&self, url: &str, options: Option<Value>) -> Result<Value, TransportError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "url": url, "options": options }))
    }
}

/// Transport that holds requests to `slow` URLs for `delay` before answering
pub struct DelayedTransport {
    pub delay: std::time::Duration,
    pub started: AtomicUsize,
    pub completed: AtomicUsize,
}

impl DelayedTransport {
    pub fn new(delay: std::time::Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            started: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl FetchTransport for DelayedTransport {
    async fn fetch_json(&self, url: &str, _options: Option<Value>) -> Result<Value, TransportError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        if url.contains("slow") {
            tokio::time::sleep(self.delay).await;
        }
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(json!({ "url": url }))
    }
}

pub fn test_config() -> SandboxConfig {
    SandboxConfig {
        execution_timeout_ms: 1_000,
        acquire_timeout_ms: 500,
        max_pool_size: 2,
        memory_limit_mb: 64,
        ..SandboxConfig::default()
    }
}

/// Route engine logs through the test harness; `RUST_LOG=debug` to see them
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn engine(sources: Arc<InMemorySources>) -> TransformEngine {
    engine_with(test_config(), sources)
}

pub fn engine_with(config: SandboxConfig, sources: Arc<InMemorySources>) -> TransformEngine {
    init_tracing();
    TransformEngine::new(config, sources, Arc::new(EchoTransport::default()))
        .expect("test engine")
}

pub fn engine_with_transport(
    config: SandboxConfig,
    sources: Arc<InMemorySources>,
    transport: Arc<dyn FetchTransport>,
) -> TransformEngine {
    init_tracing();
    TransformEngine::new(config, sources, transport).expect("test engine")
}

/// Sandbox threads alive in this process, by thread name
#[cfg(target_os = "linux")]
pub fn sandbox_threads() -> usize {
    std::fs::read_dir("/proc/self/task")
        .map(|tasks| {
            tasks
                .filter_map(|task| task.ok())
                .filter_map(|task| std::fs::read_to_string(task.path().join("comm")).ok())
                .filter(|name| name.starts_with("sieve-"))
                .count()
        })
        .unwrap_or(0)
}

/// Engine whose `fetch` goes over the real network stack
pub fn networked_engine(sources: Arc<InMemorySources>) -> TransformEngine {
    init_tracing();
    let transport = HttpFetchTransport::with_timeout(std::time::Duration::from_secs(2))
        .expect("http transport");
    TransformEngine::new(test_config(), sources, Arc::new(transport)).expect("test engine")
}

pub fn events(ids: &[&str]) -> Vec<Event> {
    ids.iter()
        .map(|id| Event::new(json!({ "messageId": id, "event": "Page Viewed" })))
        .collect()
}
