//! # Unified Error Types & Codes
//!
//! Every failure the engine can surface to a caller is a `SieveError`.
//! Codes are stable `u32` values so they can be forwarded to metrics or
//! across process boundaries without carrying the message.

use std::fmt;

/// Stable numeric codes for [`SieveError`] variants.
///
/// Organized by domain, like HTTP status families.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // === Internal Errors (1000-1999) ===
    /// Generic internal error (e.g., sandbox thread vanished)
    Internal = 1000,
    /// Configuration rejected by validation
    InvalidConfig = 1001,

    // === Timeout Errors (2000-2999) ===
    /// Pool admission wait exceeded its deadline
    AcquireTimeout = 2001,

    // === Resource Errors (3000-3999) ===
    /// Isolate hit its heap ceiling
    MemoryLimitExceeded = 3001,
    /// Sandbox was disposed or never became ready
    SandboxUnavailable = 3002,

    // === Script Errors (4000-4999) ===
    /// Bootstrap, library or user source failed to compile or initialise
    CompileFailed = 4000,
    /// Not exactly one recognized entry point
    EntryResolutionFailed = 4001,

    // === Network Errors (5000-5999) ===
    /// Transformation or library source could not be fetched
    SourceFetchFailed = 5000,
}

impl ErrorCode {
    /// Convert error code back to enum variant (lossy for unknown codes)
    pub fn from_code(code: u32) -> Self {
        match code {
            1001 => ErrorCode::InvalidConfig,
            2001 => ErrorCode::AcquireTimeout,
            3001 => ErrorCode::MemoryLimitExceeded,
            3002 => ErrorCode::SandboxUnavailable,
            4000 => ErrorCode::CompileFailed,
            4001 => ErrorCode::EntryResolutionFailed,
            5000 => ErrorCode::SourceFetchFailed,
            _ => ErrorCode::Internal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} ({})", self, *self as u32)
    }
}

/// Engine-level error surfaced to callers of the pool and coordinator.
///
/// Runtime errors raised *inside* a transformation are not errors at this
/// level; they are reported through `ExecutionOutcome::RuntimeError`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SieveError {
    /// Bootstrap, library or user source failed to compile or run its top level
    #[error("compile error for version {version_id}: {message}")]
    Compile { version_id: String, message: String },

    /// The script did not expose exactly one recognized entry point
    #[error("entry point resolution failed: {0}")]
    Resolution(String),

    /// Fetching source from the remote service failed (not retried)
    #[error("failed to fetch source for version {version_id}: {message}")]
    SourceFetch { version_id: String, message: String },

    /// Waited longer than the acquire timeout for a pool slot
    #[error("timed out after {waited_ms}ms waiting for a sandbox of version {version_id}")]
    AcquireTimeout { version_id: String, waited_ms: u64 },

    /// The isolate exceeded its heap ceiling
    #[error("memory limit of {limit_mb}MB exceeded")]
    MemoryLimitExceeded { limit_mb: u64 },

    /// The sandbox thread is gone (disposed, panicked or shut down)
    #[error("sandbox unavailable: {0}")]
    SandboxUnavailable(String),

    /// Configuration rejected by validation
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SieveError {
    pub fn code(&self) -> ErrorCode {
        match self {
            SieveError::Compile { .. } => ErrorCode::CompileFailed,
            SieveError::Resolution(_) => ErrorCode::EntryResolutionFailed,
            SieveError::SourceFetch { .. } => ErrorCode::SourceFetchFailed,
            SieveError::AcquireTimeout { .. } => ErrorCode::AcquireTimeout,
            SieveError::MemoryLimitExceeded { .. } => ErrorCode::MemoryLimitExceeded,
            SieveError::SandboxUnavailable(_) => ErrorCode::SandboxUnavailable,
            SieveError::Config(_) => ErrorCode::InvalidConfig,
            SieveError::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Check if a caller-side retry could plausibly succeed
    ///
    /// The engine itself never retries; this is a hint for callers.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SieveError::SourceFetch { .. }
                | SieveError::AcquireTimeout { .. }
                | SieveError::SandboxUnavailable(_)
        )
    }

    /// Check if error is a resource exhaustion issue
    pub fn is_resource_error(&self) -> bool {
        matches!(
            self,
            SieveError::AcquireTimeout { .. } | SieveError::MemoryLimitExceeded { .. }
        )
    }
}

/// Sieve Result type for convenience
pub type SieveResult<T> = Result<T, SieveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trip() {
        for code in [
            ErrorCode::InvalidConfig,
            ErrorCode::AcquireTimeout,
            ErrorCode::CompileFailed,
            ErrorCode::SourceFetchFailed,
        ] {
            assert_eq!(ErrorCode::from_code(code as u32), code);
        }
        assert_eq!(ErrorCode::from_code(42), ErrorCode::Internal);
    }

    #[test]
    fn retryable_errors() {
        let fetch = SieveError::SourceFetch {
            version_id: "v1".into(),
            message: "connection refused".into(),
        };
        assert!(fetch.is_retryable());
        assert!(!SieveError::Resolution("none".into()).is_retryable());
    }

    #[test]
    fn resource_errors() {
        assert!(SieveError::MemoryLimitExceeded { limit_mb: 128 }.is_resource_error());
        assert!(!SieveError::Internal("boom".into()).is_resource_error());
        assert_eq!(
            SieveError::MemoryLimitExceeded { limit_mb: 128 }.code(),
            ErrorCode::MemoryLimitExceeded
        );
    }

    #[test]
    fn messages_carry_version() {
        let err = SieveError::Compile {
            version_id: "ver-9".into(),
            message: "SyntaxError".into(),
        };
        assert!(err.to_string().contains("ver-9"));
    }
}
