//! Hexagonal adapters: everything that touches V8, threads or the network.

pub mod http;
pub mod instance;
pub mod pool;
pub mod registry;
pub mod source_cache;

pub use http::{HttpFetchTransport, HttpSourceProvider};
pub use instance::{ForwardedReply, InstanceSettings, PendingExecution, SandboxInstance};
pub use pool::{InstanceFactory, PoolConfig, SandboxPool, SandboxLease, StaticFactory, VersionFactory};
pub use registry::PoolRegistry;
pub use source_cache::{SourceCache, SourceCacheStats};
