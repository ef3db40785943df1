//! # Sieve Core
//!
//! Shared contracts between the sandbox kernel and its callers.
//! Nothing here touches V8; the kernel depends on this crate, never the
//! other way round.
//!
//! ## Module Organization
//!
//! - `config`: Sandbox, pool and timeout configuration
//! - `error`: Unified error type and stable error codes
//! - `event`: Event batches and per-message metadata
//! - `outcome`: The four-way execution outcome
//! - `source`: Transformation/library source records
//! - `traits`: Collaborator contracts (source fetch, network transport)

pub mod config;
pub mod error;
pub mod event;
pub mod outcome;
pub mod source;
pub mod traits;

// Re-export commonly used types
pub use config::SandboxConfig;
pub use error::{ErrorCode, SieveError, SieveResult};
pub use event::{Event, EventBatch, MetadataMap};
pub use outcome::ExecutionOutcome;
pub use source::{LibraryCode, TransformationCode, TransformationVersion};
pub use traits::{FetchTransport, SourceProvider};

/// Sentinel handed to sandboxed scripts when a bridged `fetch` fails.
pub const FETCH_ERROR_SENTINEL: &str = "ERROR";

/// Library version
pub const SIEVE_CORE_VERSION: &str = env!("CARGO_PKG_VERSION");
