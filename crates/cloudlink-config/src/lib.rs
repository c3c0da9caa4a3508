// crates/cloudlink-config/src/lib.rs
// ============================================================================
// Module: Cloudlink Config Library
// Description: Sync agent config model, validation and example generation.
// Purpose: Single source of truth for cloudlink-sync.toml semantics.
// Dependencies: cloudlink-core, cloudlink-store-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `cloudlink-config` defines the configuration model of the sync agent. It
//! provides strict, fail-closed loading and converts validated sections into
//! runtime worker, store and node identity values.
//!
//! Security posture: config inputs are untrusted.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
pub mod examples;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::*;
pub use examples::config_toml_example;
