//! # Collaborator Contracts
//!
//! The engine does not own a network stack. Source lookups and the real
//! HTTP call behind the sandbox's `fetch` are delegated through these
//! traits so tests (and alternative deployments) can swap them out.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::SieveResult;
use crate::source::{LibraryCode, TransformationCode};

/// Boxed error for transport failures; the bridge collapses all of them
/// into the fetch sentinel, so the concrete type never reaches a script.
pub type TransportError = Box<dyn std::error::Error + Send + Sync>;

/// Remote source of transformation and library code
#[async_trait]
pub trait SourceProvider: Send + Sync {
    async fn get_transformation_code(&self, version_id: &str) -> SieveResult<TransformationCode>;

    async fn get_library_code(&self, version_id: &str) -> SieveResult<LibraryCode>;
}

/// Performs the network request behind the sandbox's `fetch(url, options)`.
///
/// `options` is the script's second argument copied out of the sandbox
/// (`method`, `headers`, `body`, ...). Implementations return the parsed
/// JSON body.
#[async_trait]
pub trait FetchTransport: Send + Sync {
    async fn fetch_json(&self, url: &str, options: Option<Value>) -> Result<Value, TransportError>;
}
