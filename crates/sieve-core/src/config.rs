//! # Sandbox Configuration
//!
//! Resource ceilings and timing budgets for sandboxes and their pools.
//! Every knob has a default matching production behaviour and can be
//! overridden from the environment or a serialized config file.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SieveError, SieveResult};

pub const DEFAULT_CONFIG_BACKEND_URL: &str = "https://api.rudderlabs.com";

/// Sandbox and pool configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Heap ceiling per sandbox, in megabytes
    pub memory_limit_mb: u64,

    /// Wall-clock budget for one batch execution (also bounds creation)
    pub execution_timeout_ms: u64,

    /// How long `acquire` waits for a slot in an exhausted pool
    pub acquire_timeout_ms: u64,

    /// Maximum sandboxes (idle + in use) per transformation version
    pub max_pool_size: usize,

    /// Idle sandboxes older than this are disposed by `evict_idle`
    pub max_idle_time_secs: u64,

    /// Maximum number of version pools kept by the registry
    pub max_versions: usize,

    /// Base URL of the transformation source service
    pub config_backend_url: String,

    /// Dispose (rather than release) a sandbox whose script threw
    pub dispose_on_runtime_error: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            memory_limit_mb: 128,
            execution_timeout_ms: 4_000,
            acquire_timeout_ms: 10_000,
            max_pool_size: 8,
            max_idle_time_secs: 300,
            max_versions: 256,
            config_backend_url: DEFAULT_CONFIG_BACKEND_URL.to_string(),
            dispose_on_runtime_error: false,
        }
    }
}

impl SandboxConfig {
    /// Defaults overlaid with `SIEVE_*` and `CONFIG_BACKEND_URL` variables
    pub fn from_env() -> SieveResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`SandboxConfig::from_env`] with an injectable lookup
    pub fn from_lookup<F>(lookup: F) -> SieveResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(v) = parse_var(&lookup, "SIEVE_MEMORY_LIMIT_MB")? {
            config.memory_limit_mb = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_EXECUTION_TIMEOUT_MS")? {
            config.execution_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_ACQUIRE_TIMEOUT_MS")? {
            config.acquire_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_POOL_MAX_SIZE")? {
            config.max_pool_size = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_MAX_IDLE_TIME_SECS")? {
            config.max_idle_time_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_MAX_VERSIONS")? {
            config.max_versions = v;
        }
        if let Some(v) = parse_var(&lookup, "SIEVE_DISPOSE_ON_RUNTIME_ERROR")? {
            config.dispose_on_runtime_error = v;
        }
        if let Some(url) = lookup("CONFIG_BACKEND_URL") {
            config.config_backend_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject values that would make the engine unusable
    pub fn validate(&self) -> SieveResult<()> {
        if self.memory_limit_mb == 0 {
            return Err(SieveError::Config("memory_limit_mb must be > 0".into()));
        }
        if self.execution_timeout_ms == 0 {
            return Err(SieveError::Config("execution_timeout_ms must be > 0".into()));
        }
        if self.max_pool_size == 0 {
            return Err(SieveError::Config("max_pool_size must be > 0".into()));
        }
        if self.max_versions == 0 {
            return Err(SieveError::Config("max_versions must be > 0".into()));
        }
        if self.config_backend_url.trim().is_empty() {
            return Err(SieveError::Config("config_backend_url must not be empty".into()));
        }
        Ok(())
    }

    pub fn memory_limit_bytes(&self) -> usize {
        (self.memory_limit_mb as usize).saturating_mul(1024 * 1024)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_millis(self.execution_timeout_ms)
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn max_idle_time(&self) -> Duration {
        Duration::from_secs(self.max_idle_time_secs)
    }
}

fn parse_var<F, T>(lookup: &F, key: &str) -> SieveResult<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| SieveError::Config(format!("{key}: cannot parse {raw:?}"))),
    }
}
