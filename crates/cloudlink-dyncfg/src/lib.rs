// crates/cloudlink-dyncfg/src/lib.rs
// ============================================================================
// Module: Cloudlink Dyncfg Library
// Description: Configuration-tree reporting for monitored hosts.
// Purpose: Render read-only snapshots of dynamic configuration nodes.
// Dependencies: cloudlink-core, serde, serde_json, shell-words
// ============================================================================

//! ## Overview
//! This crate reports the dynamic configuration nodes registered for a host
//! as a versioned tree snapshot with aggregate health counters, and serves
//! the `config tree` function verb. It depends on the sync core only for
//! host identity.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod function;
pub mod model;
pub mod tree;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use function::CONFIG_FUNCTION;
pub use function::FunctionResponse;
pub use function::execute_config_function;
pub use model::DyncfgCommand;
pub use model::DyncfgError;
pub use model::DyncfgNode;
pub use model::DyncfgPayload;
pub use model::DyncfgSourceType;
pub use model::DyncfgStatus;
pub use model::DyncfgType;
pub use model::is_valid_id;
pub use tree::Attention;
pub use tree::DyncfgRegistry;
pub use tree::FunctionAvailability;
pub use tree::NodeView;
pub use tree::PayloadView;
pub use tree::StaticFunctions;
pub use tree::TREE_VERSION;
pub use tree::TreeSnapshot;
