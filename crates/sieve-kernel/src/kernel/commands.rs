use std::time::Instant;

use serde_json::Value;
use sieve_core::{Event, ExecutionOutcome, MetadataMap, SandboxConfig, SieveError, SieveResult};
use tracing::{debug, error, info, warn};

use crate::adapters::instance::ForwardedReply;
use crate::adapters::pool::{SandboxLease, SandboxPool};
use crate::domain::{Disposition, EntryPoint, PoolPolicy};

/// [CQS: Command] Run one batch through a version's pool
///
/// Owns the whole lifecycle of a single execution: acquire, forward the
/// batch, race it against the execution budget, classify the result and
/// decide whether the sandbox goes back to the pool.
///
/// # Outcome mapping
///
/// | Sandbox reply                | Outcome         | Sandbox  |
/// |------------------------------|-----------------|----------|
/// | resolved with an array       | Success         | released |
/// | resolved with anything else  | RuntimeError    | released |
/// | threw / rejected             | RuntimeError    | policy   |
/// | heap ceiling hit             | RuntimeError    | disposed |
/// | nothing within the budget    | TimeoutError    | disposed |
pub struct ExecuteTransformation<'a> {
    pool: &'a SandboxPool,
    config: &'a SandboxConfig,
}

impl<'a> ExecuteTransformation<'a> {
    pub fn new(pool: &'a SandboxPool, config: &'a SandboxConfig) -> Self {
        Self { pool, config }
    }

    /// Entry point of the command
    ///
    /// # Arguments
    /// * `events` - batch handed to the transformation (deep-copied in)
    /// * `metadata` - per-message metadata; derived from `events` when absent
    ///
    /// Failing entry resolution is an outcome, not an error. Source fetch,
    /// compile and acquire failures are returned as `Err`.
    pub async fn run(&self, events: &[Event], metadata: Option<MetadataMap>) -> SieveResult<ExecutionOutcome> {
        let metadata = metadata.unwrap_or_else(|| MetadataMap::from_events(events));

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 1. [Resource] Sandbox acquisition
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        let lease = match self.pool.acquire().await {
            Ok(lease) => lease,
            Err(SieveError::Resolution(message)) => {
                warn!(
                    "🔎 Entry resolution failed for version {}: {}",
                    self.pool.version_id(),
                    message
                );
                return Ok(ExecutionOutcome::ResolutionError(message));
            }
            Err(e) if e.is_resource_error() => {
                warn!("⏳ No sandbox for version {}: {}", self.pool.version_id(), e);
                return Err(e);
            }
            Err(e) => {
                error!("💥 Acquire failed for version {}: {} ({})", self.pool.version_id(), e, e.code());
                return Err(e);
            }
        };

        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        // 2. [Execution] Forward the batch
        // ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
        let batch = serde_json::to_value(events)
            .map_err(|e| SieveError::Internal(format!("batch serialization: {e}")))?;

        Ok(self.execute(lease, batch, metadata).await)
    }

    /// Execute on an already acquired lease and settle it
    pub async fn execute(&self, mut lease: SandboxLease, batch: Value, metadata: MetadataMap) -> ExecutionOutcome {
        let input_len = batch.as_array().map(Vec::len);
        let timeout = self.config.execution_timeout();
        let started = Instant::now();

        let (entry, mut pending) = match lease.instance_mut() {
            Ok(instance) => {
                let entry = instance.entry();
                match instance.start(batch, metadata) {
                    Ok(pending) => (entry, pending),
                    Err(e) => {
                        lease.dispose();
                        return ExecutionOutcome::RuntimeError(e.to_string());
                    }
                }
            }
            Err(e) => return ExecutionOutcome::RuntimeError(e.to_string()),
        };

        info!(
            "🚀 [Command] Executing version {} via {} (execution {})",
            lease.version_id(),
            entry,
            pending.execution_id
        );

        let reply = tokio::time::timeout(timeout, pending.wait()).await;
        drop(pending);

        let (outcome, force_dispose) = match reply {
            Err(_) => {
                warn!(
                    "⏱️  Version {} exceeded its {}ms budget",
                    lease.version_id(),
                    timeout.as_millis()
                );
                if let Ok(instance) = lease.instance() {
                    instance.abort();
                }
                (ExecutionOutcome::TimeoutError, true)
            }
            Ok(None) => (
                ExecutionOutcome::RuntimeError("sandbox terminated unexpectedly".to_string()),
                true,
            ),
            Ok(Some(reply)) => classify(reply, entry, input_len),
        };

        self.settle(lease, &outcome, force_dispose);
        debug!(
            "🏁 Execution finished as {} in {}ms",
            outcome.kind(),
            started.elapsed().as_millis()
        );
        outcome
    }

    fn settle(&self, lease: SandboxLease, outcome: &ExecutionOutcome, force_dispose: bool) {
        let disposition = if force_dispose {
            Disposition::Dispose
        } else {
            PoolPolicy::disposition(outcome, self.config.dispose_on_runtime_error)
        };

        match disposition {
            Disposition::Release => lease.release(),
            Disposition::Dispose => lease.dispose(),
        }
    }
}

/// Map a sandbox reply to an outcome; the flag forces disposal
fn classify(reply: ForwardedReply, entry: EntryPoint, input_len: Option<usize>) -> (ExecutionOutcome, bool) {
    match reply {
        ForwardedReply::Resolved(Value::Array(items)) => {
            if entry.is_one_to_one() && input_len.is_some_and(|n| n != items.len()) {
                warn!(
                    "⚠️  {} returned {} events for {} inputs",
                    entry,
                    items.len(),
                    input_len.unwrap_or_default()
                );
            }
            (ExecutionOutcome::Success(items), false)
        }
        ForwardedReply::Resolved(other) => (
            ExecutionOutcome::RuntimeError(format!(
                "{entry} must return an array, got {}",
                json_kind(&other)
            )),
            false,
        ),
        ForwardedReply::Rejected(message) => (ExecutionOutcome::RuntimeError(message), false),
        ForwardedReply::MemoryExceeded => (
            ExecutionOutcome::RuntimeError("memory limit exceeded".to_string()),
            true,
        ),
        ForwardedReply::Faulted(message) => (ExecutionOutcome::RuntimeError(message), true),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn array_reply_is_success() {
        let (outcome, dispose) = classify(
            ForwardedReply::Resolved(json!([{ "a": 1 }])),
            EntryPoint::Transform,
            Some(1),
        );
        assert_eq!(outcome, ExecutionOutcome::Success(vec![json!({ "a": 1 })]));
        assert!(!dispose);
    }

    #[test]
    fn non_array_reply_is_runtime_error() {
        let (outcome, dispose) =
            classify(ForwardedReply::Resolved(json!({ "a": 1 })), EntryPoint::Transform, Some(1));
        assert_eq!(
            outcome,
            ExecutionOutcome::RuntimeError("transform must return an array, got object".into())
        );
        assert!(!dispose);
    }

    #[test]
    fn memory_exhaustion_forces_disposal() {
        let (outcome, dispose) = classify(ForwardedReply::MemoryExceeded, EntryPoint::TransformBatch, None);
        assert_eq!(outcome, ExecutionOutcome::RuntimeError("memory limit exceeded".into()));
        assert!(dispose);
    }

    #[test]
    fn rejection_keeps_its_message() {
        let (outcome, dispose) =
            classify(ForwardedReply::Rejected("bad".into()), EntryPoint::TransformEvent, Some(2));
        assert_eq!(outcome, ExecutionOutcome::RuntimeError("bad".into()));
        assert!(!dispose);
    }
}
