//! # Sieve Kernel
//!
//! Runs user transformation scripts in pooled, memory-capped V8 isolates.
//!
//! ## Layers
//!
//! - `domain`: Functional core (entry points, lifecycle, pool policy)
//! - `ops`: Host bridge exposed to scripts (`fetch`, `log`, `metadata`)
//! - `adapters`: Hexagonal adapters (V8 instances, pools, source cache, HTTP)
//! - `kernel`: Commands and the `TransformEngine` facade

pub mod adapters;
pub mod domain;
pub mod kernel;
pub mod ops;

pub use adapters::{
    HttpFetchTransport, HttpSourceProvider, PoolRegistry, SandboxInstance, SandboxLease, SandboxPool,
    SourceCache,
};
pub use domain::{EntryPoint, InstanceState, PoolSnapshot};
pub use kernel::{EngineStats, ExecuteTransformation, TransformEngine};
