// crates/cloudlink-cli/src/lib.rs
// ============================================================================
// Module: Cloudlink CLI Library
// Description: Support types shared by the cloudlink-sync binary and tests.
// Purpose: Expose the JSON-lines publish channel.
// Dependencies: cloudlink-core, serde_json
// ============================================================================

//! ## Overview
//! The `cloudlink-sync` binary drives node workers against a durable SQLite
//! staging store. Without a live collector link it publishes through
//! [`SpoolPublisher`], which writes one JSON line per outbound message.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod spool;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use spool::SpoolPublisher;
