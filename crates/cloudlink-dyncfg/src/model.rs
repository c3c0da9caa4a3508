// crates/cloudlink-dyncfg/src/model.rs
// ============================================================================
// Module: Dyncfg Model
// Description: Configuration node descriptors and their closed vocabularies.
// Purpose: Describe what a plugin registered for dynamic configuration.
// Dependencies: cloudlink-core, serde, thiserror
// ============================================================================

//! ## Overview
//! A [`DyncfgNode`] is one configurable object registered by a plugin for a
//! host. Nodes are addressed by an id and grouped under a path. Labels for
//! type, status, commands and source type are fixed lowercase strings.

// ============================================================================
// SECTION: Imports
// ============================================================================

use cloudlink_core::NodeId;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

// ============================================================================
// SECTION: Vocabularies
// ============================================================================

/// Kind of configuration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DyncfgType {
    /// Standalone object.
    Single,
    /// Template jobs are created from.
    Template,
    /// Job created from a template.
    Job,
}

/// Lifecycle status of a configuration node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DyncfgStatus {
    /// Accepted by the plugin but not running.
    Accepted,
    /// Running.
    Running,
    /// Failed to apply.
    Failed,
    /// Disabled.
    Disabled,
    /// The owning plugin is no longer reachable.
    Orphan,
    /// Registered with missing required settings.
    Incomplete,
}

/// Command a node accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DyncfgCommand {
    /// Return the JSON schema.
    Schema,
    /// Return the current configuration.
    Get,
    /// Replace the configuration.
    Update,
    /// Add a job from a template.
    Add,
    /// Validate a configuration without applying it.
    Test,
    /// Remove a job.
    Remove,
    /// Enable the node.
    Enable,
    /// Disable the node.
    Disable,
    /// Restart the node.
    Restart,
    /// Render a user-facing configuration file.
    Userconfig,
}

/// Origin of a node's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DyncfgSourceType {
    /// Built into the plugin.
    Internal,
    /// Stock configuration shipped with the agent.
    Stock,
    /// User configuration file.
    User,
    /// Created through dynamic configuration.
    Dyncfg,
    /// Found by service discovery.
    Discovered,
}

// ============================================================================
// SECTION: Node
// ============================================================================

/// Stored configuration payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DyncfgPayload {
    /// MIME content type.
    pub content_type: String,
    /// Payload bytes.
    pub bytes: Vec<u8>,
}

/// Dynamic configuration node.
///
/// # Invariants
/// - `path` starts with `/`.
/// - `plugin_rejected` is tracked independently of `restart_required`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DyncfgNode {
    /// Host the node belongs to.
    pub host: NodeId,
    /// Tree path the node is listed under.
    pub path: String,
    /// Function the owning plugin serves the node through.
    pub function: String,
    /// Node kind.
    pub node_type: DyncfgType,
    /// Stored status.
    pub status: DyncfgStatus,
    /// Accepted commands.
    pub commands: Vec<DyncfgCommand>,
    /// Configuration origin.
    pub source_type: DyncfgSourceType,
    /// Free-form origin description.
    pub source: String,
    /// Whether commands are executed synchronously.
    pub sync: bool,
    /// Disabled by the user.
    pub user_disabled: bool,
    /// A restart is needed to apply the stored configuration.
    pub restart_required: bool,
    /// The plugin refused the stored configuration.
    pub plugin_rejected: bool,
    /// Stored configuration payload.
    pub payload: Option<DyncfgPayload>,
    /// Number of times the configuration was saved.
    pub saves: u64,
    /// Creation time in microseconds since the epoch.
    pub created_ut: u64,
    /// Last modification time in microseconds since the epoch.
    pub modified_ut: u64,
}

impl DyncfgNode {
    /// Creates a running node with no flags, payload or commands.
    #[must_use]
    pub fn new(host: NodeId, path: impl Into<String>, function: impl Into<String>) -> Self {
        Self {
            host,
            path: path.into(),
            function: function.into(),
            node_type: DyncfgType::Single,
            status: DyncfgStatus::Running,
            commands: Vec::new(),
            source_type: DyncfgSourceType::Internal,
            source: String::new(),
            sync: false,
            user_disabled: false,
            restart_required: false,
            plugin_rejected: false,
            payload: None,
            saves: 0,
            created_ut: 0,
            modified_ut: 0,
        }
    }

    /// Validates registration invariants.
    ///
    /// # Errors
    ///
    /// Returns [`DyncfgError::Invalid`] when the path or function is malformed.
    pub fn validate(&self) -> Result<(), DyncfgError> {
        if !self.path.starts_with('/') {
            return Err(DyncfgError::Invalid(format!("path must start with '/': {}", self.path)));
        }
        if self.function.trim().is_empty() {
            return Err(DyncfgError::Invalid("function must be non-empty".to_string()));
        }
        Ok(())
    }
}

// ============================================================================
// SECTION: Identifiers
// ============================================================================

/// Reports whether `id` is usable as a configuration id.
///
/// Ids are non-empty and contain no whitespace, quotes, backslashes or
/// control characters.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.chars().all(|ch| {
            !ch.is_whitespace() && !ch.is_control() && !matches!(ch, '\'' | '"' | '\\' | '`')
        })
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration-tree errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DyncfgError {
    /// Id contains characters that are not allowed.
    #[error("invalid id given")]
    InvalidId(String),
    /// Node registration is malformed.
    #[error("invalid config node: {0}")]
    Invalid(String),
    /// Registry lock was poisoned.
    #[error("config registry unavailable: {0}")]
    Unavailable(String),
}
