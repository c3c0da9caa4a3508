// crates/cloudlink-dyncfg/src/tree.rs
// ============================================================================
// Module: Dyncfg Tree
// Description: Registry of configuration nodes and tree snapshot rendering.
// Purpose: Report every configuration node of a host for health triage.
// Dependencies: cloudlink-core, serde
// ============================================================================

//! ## Overview
//! [`DyncfgRegistry`] holds every registered node by id. [`render_tree`]
//! builds a [`TreeSnapshot`] for one host: nodes whose path starts with the
//! requested root, grouped by path and then by id in lexicographic order.
//! A node whose function is no longer available is reported as `orphan` and
//! does not count towards the attention counters.
//!
//! [`render_tree`]: DyncfgRegistry::render_tree

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::RwLock;

use cloudlink_core::NodeId;
use serde::Serialize;

use crate::model::DyncfgCommand;
use crate::model::DyncfgError;
use crate::model::DyncfgNode;
use crate::model::DyncfgSourceType;
use crate::model::DyncfgStatus;
use crate::model::DyncfgType;
use crate::model::is_valid_id;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Snapshot format version.
pub const TREE_VERSION: u32 = 1;

// ============================================================================
// SECTION: Function Availability
// ============================================================================

/// Answers whether a host currently serves a function.
pub trait FunctionAvailability: Send + Sync {
    /// Returns true when `function` is reachable on `host`.
    fn is_available(&self, host: &NodeId, function: &str) -> bool;
}

/// Fixed set of available function names, shared by every host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StaticFunctions {
    /// Available function names.
    names: BTreeSet<String>,
}

impl StaticFunctions {
    /// Creates an availability set from function names.
    #[must_use]
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }
}

impl FunctionAvailability for StaticFunctions {
    fn is_available(&self, _host: &NodeId, function: &str) -> bool {
        self.names.contains(function)
    }
}

// ============================================================================
// SECTION: Snapshot
// ============================================================================

/// Payload summary of a rendered node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PayloadView {
    /// Whether a non-empty payload is stored.
    pub available: bool,
    /// MIME content type when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    /// Payload length in bytes when available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_length: Option<u64>,
}

/// Rendered configuration node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NodeView {
    /// Node kind.
    #[serde(rename = "type")]
    pub node_type: DyncfgType,
    /// Effective status; `orphan` when the function is unavailable.
    pub status: DyncfgStatus,
    /// Accepted commands.
    pub cmds: Vec<DyncfgCommand>,
    /// Configuration origin.
    pub source_type: DyncfgSourceType,
    /// Free-form origin description.
    pub source: String,
    /// Synchronous execution flag.
    pub sync: bool,
    /// Disabled by the user.
    pub user_disabled: bool,
    /// Restart needed.
    pub restart_required: bool,
    /// Rejected by the plugin.
    pub plugin_rejected: bool,
    /// Payload summary.
    pub payload: PayloadView,
    /// Save count.
    pub saves: u64,
    /// Creation time (µs).
    pub created_ut: u64,
    /// Modification time (µs).
    pub modified_ut: u64,
}

/// Aggregate degraded-node counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Attention {
    /// True when any counter is non-zero.
    pub degraded: bool,
    /// Nodes needing a restart.
    pub restart_required: u64,
    /// Nodes rejected by their plugin.
    pub plugin_rejected: u64,
    /// Nodes in `failed` status.
    pub status_failed: u64,
    /// Nodes in `incomplete` status.
    pub status_incomplete: u64,
}

/// Versioned configuration-tree snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeSnapshot {
    /// Format version.
    pub version: u32,
    /// Nodes keyed by path, then by id.
    pub tree: BTreeMap<String, BTreeMap<String, NodeView>>,
    /// Degraded-node counters.
    pub attention: Attention,
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of configuration nodes keyed by id.
#[derive(Debug, Default)]
pub struct DyncfgRegistry {
    /// Nodes by id.
    nodes: RwLock<BTreeMap<String, DyncfgNode>>,
}

impl DyncfgRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a node.
    ///
    /// # Errors
    ///
    /// Returns [`DyncfgError::InvalidId`] or [`DyncfgError::Invalid`] when the
    /// id or node is malformed.
    pub fn upsert(&self, id: &str, node: DyncfgNode) -> Result<(), DyncfgError> {
        if !is_valid_id(id) {
            return Err(DyncfgError::InvalidId(id.to_string()));
        }
        node.validate()?;
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        nodes.insert(id.to_string(), node);
        Ok(())
    }

    /// Removes a node.
    ///
    /// # Errors
    ///
    /// Returns [`DyncfgError::Unavailable`] when the registry lock is poisoned.
    pub fn remove(&self, id: &str) -> Result<Option<DyncfgNode>, DyncfgError> {
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        Ok(nodes.remove(id))
    }

    /// Returns a copy of a node.
    ///
    /// # Errors
    ///
    /// Returns [`DyncfgError::Unavailable`] when the registry lock is poisoned.
    pub fn get(&self, id: &str) -> Result<Option<DyncfgNode>, DyncfgError> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        Ok(nodes.get(id).cloned())
    }

    /// Renders the tree of `host` below `root_path`, optionally restricted to
    /// one id.
    ///
    /// # Errors
    ///
    /// Returns [`DyncfgError::InvalidId`] when `id` is malformed; no partial
    /// snapshot is produced.
    pub fn render_tree(
        &self,
        host: &NodeId,
        root_path: &str,
        id: Option<&str>,
        functions: &dyn FunctionAvailability,
    ) -> Result<TreeSnapshot, DyncfgError> {
        if let Some(id) = id
            && !is_valid_id(id)
        {
            return Err(DyncfgError::InvalidId(id.to_string()));
        }
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        let mut snapshot = TreeSnapshot {
            version: TREE_VERSION,
            tree: BTreeMap::new(),
            attention: Attention::default(),
        };
        for (node_id, node) in nodes.iter() {
            if node.host != *host || !node.path.starts_with(root_path) {
                continue;
            }
            if id.is_some_and(|wanted| wanted != node_id) {
                continue;
            }
            let view = render_node(node, functions.is_available(host, &node.function));
            if view.status != DyncfgStatus::Orphan {
                count_attention(&mut snapshot.attention, &view);
            }
            snapshot.tree.entry(node.path.clone()).or_default().insert(node_id.clone(), view);
        }
        let attention = &mut snapshot.attention;
        attention.degraded = attention.restart_required
            + attention.plugin_rejected
            + attention.status_failed
            + attention.status_incomplete
            > 0;
        Ok(snapshot)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Builds the rendered view of a node.
fn render_node(node: &DyncfgNode, function_available: bool) -> NodeView {
    let payload = match &node.payload {
        Some(payload) if !payload.bytes.is_empty() => PayloadView {
            available: true,
            content_type: Some(payload.content_type.clone()),
            content_length: Some(u64::try_from(payload.bytes.len()).unwrap_or(u64::MAX)),
        },
        _ => PayloadView {
            available: false,
            content_type: None,
            content_length: None,
        },
    };
    NodeView {
        node_type: node.node_type,
        status: if function_available { node.status } else { DyncfgStatus::Orphan },
        cmds: node.commands.clone(),
        source_type: node.source_type,
        source: node.source.clone(),
        sync: node.sync,
        user_disabled: node.user_disabled,
        restart_required: node.restart_required,
        plugin_rejected: node.plugin_rejected,
        payload,
        saves: node.saves,
        created_ut: node.created_ut,
        modified_ut: node.modified_ut,
    }
}

/// Adds a non-orphan node to the attention counters.
fn count_attention(attention: &mut Attention, view: &NodeView) {
    if view.restart_required {
        attention.restart_required += 1;
    }
    if view.plugin_rejected {
        attention.plugin_rejected += 1;
    }
    match view.status {
        DyncfgStatus::Failed => attention.status_failed += 1,
        DyncfgStatus::Incomplete => attention.status_incomplete += 1,
        _ => {}
    }
}

/// Maps a poisoned lock.
fn poisoned() -> DyncfgError {
    DyncfgError::Unavailable("registry lock poisoned".to_string())
}
