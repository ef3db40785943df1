//! State the bridge ops read and write inside one sandbox's `OpState`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sieve_core::{FetchTransport, MetadataMap};

/// Host-side handles a sandbox's ops need. Put into `OpState` at creation.
#[derive(Clone)]
pub struct BridgeContext {
    pub version_id: String,

    /// Runtime the real network calls are spawned on
    pub host: tokio::runtime::Handle,

    pub transport: Arc<dyn FetchTransport>,
    pub counters: Arc<BridgeCounters>,
}

/// Engine-wide bridge call counters, shared by every sandbox
#[derive(Debug, Default)]
pub struct BridgeCounters {
    pub fetch_calls: AtomicU64,
    pub fetch_failures: AtomicU64,
    pub log_calls: AtomicU64,
    pub metadata_calls: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStatsSnapshot {
    pub fetch_calls: u64,
    pub fetch_failures: u64,
    pub log_calls: u64,
    pub metadata_calls: u64,
}

impl BridgeCounters {
    pub fn snapshot(&self) -> BridgeStatsSnapshot {
        BridgeStatsSnapshot {
            fetch_calls: self.fetch_calls.load(Ordering::Relaxed),
            fetch_failures: self.fetch_failures.load(Ordering::Relaxed),
            log_calls: self.log_calls.load(Ordering::Relaxed),
            metadata_calls: self.metadata_calls.load(Ordering::Relaxed),
        }
    }
}

/// How the entry point settled, as relayed by the forwarding invoker
#[derive(Debug, Clone, PartialEq)]
pub enum Forwarded {
    Resolved(Value),
    Rejected(String),
}

/// Entry names the resolution hook found on the global scope
#[derive(Debug, Default)]
pub struct EntryCandidates(pub Option<Vec<String>>);

/// The execution currently running in the sandbox.
///
/// One-shot by construction: the batch can be taken once, and the first
/// settlement for the current id wins. Anything addressed to another id
/// (a late `fetch` continuation from an abandoned run) is dropped.
#[derive(Debug, Default)]
pub struct ExecutionSlot {
    current: Option<u32>,
    batch: Option<Value>,
    metadata: MetadataMap,
    settled: Option<Forwarded>,
}

impl ExecutionSlot {
    pub fn begin(&mut self, execution_id: u32, batch: Value, metadata: MetadataMap) {
        self.current = Some(execution_id);
        self.batch = Some(batch);
        self.metadata = metadata;
        self.settled = None;
    }

    /// Hand the batch to the sandbox; empty for stale ids or a second take
    pub fn take_batch(&mut self, execution_id: u32) -> Value {
        if self.current != Some(execution_id) {
            return Value::Array(Vec::new());
        }
        self.batch.take().unwrap_or_else(|| Value::Array(Vec::new()))
    }

    pub fn metadata(&self, message_id: &str) -> Value {
        self.metadata.lookup(message_id)
    }

    /// Record the outcome; `false` when the id is stale or already settled
    pub fn settle(&mut self, execution_id: u32, forwarded: Forwarded) -> bool {
        if self.current != Some(execution_id) {
            return false;
        }
        self.current = None;
        self.settled = Some(forwarded);
        true
    }

    pub fn take_settled(&mut self) -> Option<Forwarded> {
        self.settled.take()
    }

    /// Drop everything belonging to the finished execution
    pub fn finish(&mut self) {
        self.current = None;
        self.batch = None;
        self.metadata = MetadataMap::default();
        self.settled = None;
    }
}
