//! Engine configuration via `apogy.toml`
//!
//! Every section has defaults, so an empty file (or no file at all) yields a
//! working in-memory engine. On first start a commented default file can be
//! written next to the data with [`EngineConfig::write_default_if_missing`].

use std::path::Path;

use apogy_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::retry::RetryConfig;

/// Config file name
pub const CONFIG_FILE_NAME: &str = "apogy.toml";

/// KV backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Snapshot-isolated multi-version store with commit-time conflict detection
    #[default]
    Mvcc,
    /// Single ordered map behind a global write gate
    Embedded,
}

/// Stored document encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    /// `j` tag + JSON
    #[default]
    Json,
    /// `m` tag + MessagePack with named fields
    Msgpack,
}

/// Background reconciliation settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Worker threads; 0 runs reconciliation inline after each commit
    pub workers: usize,
    /// Queued tasks beyond this run inline instead
    pub max_queue_depth: usize,
    /// Attempts per reactor before the failure is logged and dropped
    pub max_attempts: usize,
    /// First retry delay in milliseconds, doubled per attempt
    pub base_delay_ms: u64,
    /// Retry delay cap in milliseconds
    pub max_delay_ms: u64,
    /// Time budget of one reconcile task in milliseconds
    pub timeout_ms: u64,
    /// Lease of the per-document bus lock in milliseconds
    pub lock_lease_ms: u64,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            workers: 2,
            max_queue_depth: 4096,
            max_attempts: 10,
            base_delay_ms: 10,
            max_delay_ms: 1000,
            timeout_ms: 60_000,
            lock_lease_ms: 1000,
        }
    }
}

/// Search pagination settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Page size when the request sets none
    pub default_limit: usize,
    /// Largest page size a request may ask for
    pub max_limit: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 100,
            max_limit: 1000,
        }
    }
}

impl SearchConfig {
    /// Effective page size for a requested limit
    pub fn page_size(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(0) | None => self.default_limit,
            Some(n) => n.min(self.max_limit),
        }
    }
}

/// Engine configuration loaded from `apogy.toml`.
///
/// # Example
///
/// ```toml
/// backend = "mvcc"
/// encoding = "json"
/// log_level = "info"
///
/// [retry]
/// max_retries = 100
///
/// [search]
/// default_limit = 100
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// KV backend
    pub backend: Backend,
    /// Encoding used for newly written documents
    pub encoding: Encoding,
    /// `trace`, `debug`, `info`, `warn` or `error`
    pub log_level: String,
    /// Implicit-write retry policy
    pub retry: RetryConfig,
    /// Reconciliation workers
    pub reconcile: ReconcileConfig,
    /// Search pagination
    pub search: SearchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            encoding: Encoding::default(),
            log_level: "info".to_string(),
            retry: RetryConfig::default(),
            reconcile: ReconcileConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Select the KV backend (builder style)
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Select the stored encoding (builder style)
    pub fn with_encoding(mut self, encoding: Encoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Set the log level (builder style)
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Set the retry policy (builder style)
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the reconcile settings (builder style)
    pub fn with_reconcile(mut self, reconcile: ReconcileConfig) -> Self {
        self.reconcile = reconcile;
        self
    }

    /// Set the number of reconcile workers (builder style)
    pub fn with_reconcile_workers(mut self, workers: usize) -> Self {
        self.reconcile.workers = workers;
        self
    }

    /// Set the search settings (builder style)
    pub fn with_search(mut self, search: SearchConfig) -> Self {
        self.search = search;
        self
    }

    /// Parse the configured log level
    ///
    /// # Errors
    ///
    /// Returns `Validation` for anything but the five tracing levels.
    pub fn log_level(&self) -> Result<tracing::Level> {
        self.log_level.parse::<tracing::Level>().map_err(|_| {
            Error::validation(format!(
                "invalid log_level '{}' in {}: expected trace, debug, info, warn or error",
                self.log_level, CONFIG_FILE_NAME
            ))
        })
    }

    /// Check cross-field constraints
    ///
    /// # Errors
    ///
    /// Returns `Validation` naming the offending setting.
    pub fn validate(&self) -> Result<()> {
        self.log_level()?;
        if self.search.default_limit == 0 || self.search.max_limit == 0 {
            return Err(Error::validation("search limits must be positive"));
        }
        if self.search.default_limit > self.search.max_limit {
            return Err(Error::validation(
                "search.default_limit must not exceed search.max_limit",
            ));
        }
        if self.reconcile.max_attempts == 0 {
            return Err(Error::validation("reconcile.max_attempts must be positive"));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# Apogy engine configuration
#
# KV backend: "mvcc" (default) or "embedded"
#   "mvcc"     = snapshot isolation, commit-time conflict detection
#   "embedded" = one global write gate, reads are not snapshot-isolated
backend = "mvcc"

# Encoding of stored documents: "json" (default) or "msgpack".
# Readers accept both, so this can be changed at any time.
encoding = "json"

# trace, debug, info, warn, error
log_level = "info"

# Retry policy for writes without an explicit version
[retry]
max_retries = 100
base_delay_ms = 1
max_delay_ms = 50
jitter = true

# Post-commit reactor reconciliation
[reconcile]
workers = 2
max_queue_depth = 4096
max_attempts = 10
base_delay_ms = 10
max_delay_ms = 1000
timeout_ms = 60000
lock_lease_ms = 1000

[search]
default_limit = 100
max_limit = 1000
"#
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::internal(format!(
                "failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: EngineConfig = toml::from_str(&content).map_err(|e| {
            Error::validation(format!(
                "failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the default config file if it does not already exist.
    ///
    /// Returns `Ok(())` whether the file was created or already existed.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml()).map_err(|e| {
                Error::internal(format!(
                    "failed to write default config file '{}': {}",
                    path.display(),
                    e
                ))
            })?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::internal(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| {
            Error::internal(format!(
                "failed to write config file '{}': {}",
                path.display(),
                e
            ))
        })
    }
}
