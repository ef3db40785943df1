//! Bridge ops. Arguments and return values cross the isolate boundary
//! through `serde_v8`, so the sandbox only ever holds copies.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::Ordering;

use deno_core::{op2, OpState};
use serde_json::Value;
use sieve_core::FETCH_ERROR_SENTINEL;
use tracing::{debug, warn};

use super::state::{BridgeContext, EntryCandidates, ExecutionSlot, Forwarded};

/// [Op] `fetch(url, options)`: the host performs the request.
///
/// The call is spawned on the host runtime, so it keeps running even if the
/// sandbox is torn down; in that case the result has nowhere to go and is
/// dropped with the op future. Every failure becomes the sentinel string.
#[op2(async)]
#[serde]
pub async fn op_sieve_fetch(
    state: Rc<RefCell<OpState>>,
    #[string] url: String,
    #[serde] options: Option<serde_json::Value>,
) -> serde_json::Value {
    let ctx = state.borrow().borrow::<BridgeContext>().clone();
    ctx.counters.fetch_calls.fetch_add(1, Ordering::Relaxed);

    let transport = ctx.transport.clone();
    let target = url.clone();
    let request = ctx
        .host
        .spawn(async move { transport.fetch_json(&target, options).await });

    match request.await {
        Ok(Ok(body)) => body,
        Ok(Err(e)) => {
            ctx.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
            debug!(version_id = %ctx.version_id, "🌐 fetch {} failed: {}", url, e);
            Value::String(FETCH_ERROR_SENTINEL.to_string())
        }
        Err(e) => {
            ctx.counters.fetch_failures.fetch_add(1, Ordering::Relaxed);
            warn!(version_id = %ctx.version_id, "🌐 fetch task for {} aborted: {}", url, e);
            Value::String(FETCH_ERROR_SENTINEL.to_string())
        }
    }
}

/// [Op] `log(...values)`: fire-and-forget diagnostics
#[op2]
pub fn op_sieve_log(state: &mut OpState, #[serde] values: Vec<serde_json::Value>) {
    let ctx = state.borrow::<BridgeContext>();
    ctx.counters.log_calls.fetch_add(1, Ordering::Relaxed);

    let line = values
        .iter()
        .map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
        .collect::<Vec<_>>()
        .join(" ");
    debug!(target: "sieve::script", version_id = %ctx.version_id, "[JS] {}", line);
}

/// [Op] `metadata(messageId)`: synchronous lookup in the current batch's map
#[op2]
#[serde]
pub fn op_sieve_metadata(state: &mut OpState, #[string] message_id: String) -> serde_json::Value {
    state
        .borrow::<BridgeContext>()
        .counters
        .metadata_calls
        .fetch_add(1, Ordering::Relaxed);
    state.borrow::<ExecutionSlot>().metadata(&message_id)
}

/// [Op] Copy the current execution's batch into the sandbox
#[op2]
#[serde]
pub fn op_sieve_take_batch(state: &mut OpState, execution_id: u32) -> serde_json::Value {
    state.borrow_mut::<ExecutionSlot>().take_batch(execution_id)
}

/// [Op] Forwarding invoker: entry point fulfilled
#[op2]
pub fn op_sieve_resolve(state: &mut OpState, execution_id: u32, #[serde] value: serde_json::Value) {
    if !state
        .borrow_mut::<ExecutionSlot>()
        .settle(execution_id, Forwarded::Resolved(value))
    {
        debug!("🔕 Ignoring late resolution for execution {}", execution_id);
    }
}

/// [Op] Forwarding invoker: entry point threw or rejected
#[op2(fast)]
pub fn op_sieve_reject(state: &mut OpState, execution_id: u32, #[string] message: String) {
    if !state
        .borrow_mut::<ExecutionSlot>()
        .settle(execution_id, Forwarded::Rejected(message))
    {
        debug!("🔕 Ignoring late rejection for execution {}", execution_id);
    }
}

/// [Op] Entry-point resolution report
#[op2]
pub fn op_sieve_register_entry(state: &mut OpState, #[serde] names: Vec<String>) {
    let candidates = state.borrow_mut::<EntryCandidates>();
    if candidates.0.is_none() {
        candidates.0 = Some(names);
    }
}
