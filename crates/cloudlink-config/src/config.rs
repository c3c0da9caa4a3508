// crates/cloudlink-config/src/config.rs
// ============================================================================
// Module: Cloudlink Sync Configuration
// Description: Configuration loading and validation for the sync agent.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: cloudlink-core, cloudlink-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! Missing or invalid configuration fails closed. Every section has defaults,
//! so an empty file yields a runnable agent with no nodes.
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use cloudlink_core::BatchLimits;
use cloudlink_core::NodeDescriptor;
use cloudlink_core::NodeId;
use cloudlink_core::NodeIdentity;
use cloudlink_core::RemoteNodeId;
use cloudlink_core::WorkerConfig;
use cloudlink_store_sqlite::SqliteStoreConfig;
use cloudlink_store_sqlite::SqliteStoreMode;
use cloudlink_store_sqlite::SqliteSyncMode;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "cloudlink-sync.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "CLOUDLINK_SYNC_CONFIG";
/// Maximum configuration file size in bytes.
pub const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;
/// Default store database path.
const DEFAULT_STORE_PATH: &str = "cloudlink-sync.db";
/// Default busy timeout in milliseconds.
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Maximum busy timeout in milliseconds.
const MAX_BUSY_TIMEOUT_MS: u64 = 60_000;
/// Default read pool size.
const DEFAULT_READ_POOL_SIZE: usize = 2;
/// Maximum read pool size.
const MAX_READ_POOL_SIZE: usize = 64;
/// Maximum command queue capacity.
const MAX_QUEUE_CAPACITY: usize = 1_000_000;
/// Maximum records per published message.
const MAX_BATCH_SIZE: usize = 10_000;
/// Maximum messages per batch.
const MAX_BATCH_COUNT: usize = 1_000;
/// Maximum number of configured nodes.
pub const MAX_NODES: usize = 1_024;
/// Maximum length of node descriptor strings.
const MAX_DESCRIPTOR_LENGTH: usize = 255;
/// Maximum number of labels per node.
const MAX_LABELS: usize = 64;
/// Accepted logging levels.
const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

// ============================================================================
// SECTION: Root Config
// ============================================================================

/// Sync agent configuration.
///
/// # Invariants
/// - [`SyncConfig::validate`] has succeeded for configs returned by
///   [`SyncConfig::load`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Staging store configuration.
    #[serde(default)]
    pub store: StoreConfig,
    /// Per-node worker configuration.
    #[serde(default)]
    pub worker: WorkerSection,
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Nodes started at launch.
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
}

impl SyncConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// The path is taken from `path`, then from [`CONFIG_ENV_VAR`], then the
    /// default file name in the working directory.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = resolve_path(path)?;
        validate_path(&resolved)?;
        let bytes = fs::read(&resolved).map_err(|err| ConfigError::Io(err.to_string()))?;
        if bytes.len() > MAX_CONFIG_FILE_SIZE {
            return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
        }
        let content = std::str::from_utf8(&bytes)
            .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))?;
        Self::from_toml(content)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when parsing or validation fails.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.validate()?;
        self.worker.validate()?;
        self.logging.validate()?;
        if self.nodes.len() > MAX_NODES {
            return Err(ConfigError::Invalid(format!("nodes exceeds max of {MAX_NODES}")));
        }
        let mut seen = BTreeSet::new();
        for node in &self.nodes {
            node.validate()?;
            if !seen.insert(node.node_id) {
                return Err(ConfigError::Invalid(format!("duplicate node_id: {}", node.node_id)));
            }
        }
        Ok(())
    }

    /// Returns the worker configuration shared by every node.
    #[must_use]
    pub const fn worker_config(&self) -> WorkerConfig {
        self.worker.to_worker_config()
    }

    /// Returns the staging store configuration.
    #[must_use]
    pub fn store_config(&self) -> SqliteStoreConfig {
        self.store.to_sqlite_config()
    }

    /// Returns the identities of every configured node.
    #[must_use]
    pub fn node_identities(&self) -> Vec<NodeIdentity> {
        self.nodes.iter().map(NodeConfig::identity).collect()
    }
}

// ============================================================================
// SECTION: Store
// ============================================================================

/// Staging store configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// `SQLite` database path.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: SqliteStoreMode,
    /// `SQLite` synchronous mode.
    #[serde(default)]
    pub sync_mode: SqliteSyncMode,
    /// Number of read connections.
    #[serde(default = "default_read_pool_size")]
    pub read_pool_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: SqliteStoreMode::default(),
            sync_mode: SqliteSyncMode::default(),
            read_pool_size: default_read_pool_size(),
        }
    }
}

impl StoreConfig {
    /// Validates store configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        let text = self.path.to_string_lossy();
        validate_path_string("store.path", &text)?;
        if self.busy_timeout_ms == 0 || self.busy_timeout_ms > MAX_BUSY_TIMEOUT_MS {
            return Err(ConfigError::Invalid(format!(
                "store.busy_timeout_ms must be between 1 and {MAX_BUSY_TIMEOUT_MS}"
            )));
        }
        validate_range("store.read_pool_size", self.read_pool_size, MAX_READ_POOL_SIZE)
    }

    /// Converts into the store backend configuration.
    fn to_sqlite_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: self.path.clone(),
            busy_timeout_ms: self.busy_timeout_ms,
            journal_mode: self.journal_mode,
            sync_mode: self.sync_mode,
            read_pool_size: self.read_pool_size,
        }
    }
}

/// Returns the default store path.
fn default_store_path() -> PathBuf {
    PathBuf::from(DEFAULT_STORE_PATH)
}

/// Returns the default busy timeout.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default read pool size.
const fn default_read_pool_size() -> usize {
    DEFAULT_READ_POOL_SIZE
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Worker configuration section. Missing keys take the worker defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    /// Command queue capacity per node.
    pub queue_capacity: usize,
    /// Maximum records per published message.
    pub max_batch_size: usize,
    /// Maximum messages per batch.
    pub max_batch_count: usize,
    /// Age after which an unacknowledged batch is abandoned (seconds).
    pub batch_lifetime_secs: u64,
    /// Delay before the first cleanup (seconds).
    pub cleanup_first_secs: u64,
    /// Interval between cleanups (seconds).
    pub cleanup_interval_secs: u64,
    /// Retention of acknowledged rows (seconds).
    pub ack_retention_secs: u64,
    /// Maximum acknowledged rows kept per stream.
    pub max_acked_rows: usize,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let defaults = WorkerConfig::default();
        Self {
            queue_capacity: defaults.queue_capacity,
            max_batch_size: defaults.batch_limits.max_batch_size,
            max_batch_count: defaults.batch_limits.max_batch_count,
            batch_lifetime_secs: defaults.batch_lifetime_secs,
            cleanup_first_secs: defaults.cleanup_first_secs,
            cleanup_interval_secs: defaults.cleanup_interval_secs,
            ack_retention_secs: defaults.ack_retention_secs,
            max_acked_rows: defaults.max_acked_rows,
        }
    }
}

impl WorkerSection {
    /// Validates worker configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        validate_range("worker.queue_capacity", self.queue_capacity, MAX_QUEUE_CAPACITY)?;
        validate_range("worker.max_batch_size", self.max_batch_size, MAX_BATCH_SIZE)?;
        validate_range("worker.max_batch_count", self.max_batch_count, MAX_BATCH_COUNT)?;
        if self.max_acked_rows == 0 {
            return Err(ConfigError::Invalid(
                "worker.max_acked_rows must be greater than zero".to_string(),
            ));
        }
        if self.batch_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.batch_lifetime_secs must be greater than zero".to_string(),
            ));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "worker.cleanup_interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Converts into the runtime worker configuration.
    const fn to_worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            queue_capacity: self.queue_capacity,
            batch_limits: BatchLimits {
                max_batch_size: self.max_batch_size,
                max_batch_count: self.max_batch_count,
            },
            batch_lifetime_secs: self.batch_lifetime_secs,
            cleanup_first_secs: self.cleanup_first_secs,
            cleanup_interval_secs: self.cleanup_interval_secs,
            ack_retention_secs: self.ack_retention_secs,
            max_acked_rows: self.max_acked_rows,
        }
    }
}

// ============================================================================
// SECTION: Logging
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default log level (`trace`, `debug`, `info`, `warn`, `error`).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LoggingConfig {
    /// Validates logging configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if LOG_LEVELS.contains(&self.level.as_str()) {
            Ok(())
        } else {
            Err(ConfigError::Invalid(format!(
                "logging.level must be one of {}",
                LOG_LEVELS.join(", ")
            )))
        }
    }
}

/// Returns the default log level.
fn default_log_level() -> String {
    "info".to_string()
}

// ============================================================================
// SECTION: Nodes
// ============================================================================

/// A node started at launch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Local node id.
    pub node_id: NodeId,
    /// Remote node id, when the node is already claimed.
    #[serde(default)]
    pub remote_node_id: Option<RemoteNodeId>,
    /// Hostname reported by the agent.
    pub hostname: String,
    /// Operating system label.
    #[serde(default)]
    pub os: String,
    /// Agent version string.
    #[serde(default)]
    pub agent_version: String,
    /// Free-form host labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl NodeConfig {
    /// Validates node configuration.
    fn validate(&self) -> Result<(), ConfigError> {
        if self.hostname.trim().is_empty() {
            return Err(ConfigError::Invalid(format!(
                "nodes.hostname must be non-empty for node {}",
                self.node_id
            )));
        }
        for (field, value) in
            [("hostname", &self.hostname), ("os", &self.os), ("agent_version", &self.agent_version)]
        {
            if value.len() > MAX_DESCRIPTOR_LENGTH {
                return Err(ConfigError::Invalid(format!("nodes.{field} exceeds max length")));
            }
        }
        if self.labels.len() > MAX_LABELS {
            return Err(ConfigError::Invalid(format!("nodes.labels exceeds max of {MAX_LABELS}")));
        }
        Ok(())
    }

    /// Returns the runtime identity of the node.
    #[must_use]
    pub fn identity(&self) -> NodeIdentity {
        NodeIdentity {
            node_id: self.node_id,
            remote_node_id: self.remote_node_id,
            descriptor: NodeDescriptor {
                hostname: self.hostname.clone(),
                os: self.os.clone(),
                agent_version: self.agent_version.clone(),
                labels: self.labels.clone(),
            },
        }
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Resolves the config path from CLI or environment defaults.
fn resolve_path(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = path {
        return Ok(path.to_path_buf());
    }
    if let Ok(env_path) = env::var(CONFIG_ENV_VAR) {
        if env_path.len() > MAX_TOTAL_PATH_LENGTH {
            return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
        }
        return Ok(PathBuf::from(env_path));
    }
    Ok(PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Validates the resolved path against security limits.
fn validate_path(path: &Path) -> Result<(), ConfigError> {
    let text = path.to_string_lossy();
    if text.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid("config path exceeds max length".to_string()));
    }
    for component in path.components() {
        let value = component.as_os_str().to_string_lossy();
        if value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid("config path component too long".to_string()));
        }
    }
    Ok(())
}

/// Validates a path string against length constraints.
fn validate_path_string(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    for component in Path::new(trimmed).components() {
        let component_value = component.as_os_str().to_string_lossy();
        if component_value.len() > MAX_PATH_COMPONENT_LENGTH {
            return Err(ConfigError::Invalid(format!("{field} path component too long")));
        }
    }
    Ok(())
}

/// Validates a count is within `1 ..= max`.
fn validate_range(field: &str, value: usize, max: usize) -> Result<(), ConfigError> {
    if value == 0 || value > max {
        return Err(ConfigError::Invalid(format!("{field} must be between 1 and {max}")));
    }
    Ok(())
}
