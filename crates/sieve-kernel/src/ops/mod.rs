//! Host bridge: the ops a sandbox may call and the bootstrap that wraps
//! them into the script-visible `fetch`, `log` and `metadata` globals.

pub mod bridge;
pub mod state;

pub use state::{BridgeContext, BridgeCounters, EntryCandidates, ExecutionSlot, Forwarded};

/// Installs the capability globals and the forwarding invoker.
/// Runs once per isolate, before any library or user source.
pub const BOOTSTRAP_JS: &str = include_str!("bootstrap.js");

deno_core::extension!(
    sieve_bridge,
    ops = [
        bridge::op_sieve_fetch,
        bridge::op_sieve_log,
        bridge::op_sieve_metadata,
        bridge::op_sieve_take_batch,
        bridge::op_sieve_resolve,
        bridge::op_sieve_reject,
        bridge::op_sieve_register_entry,
    ],
);
