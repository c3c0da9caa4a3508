// system-tests/tests/helpers/mod.rs
// ============================================================================
// Module: System Test Helpers
// Description: Shared helpers for cloudlink system-tests.
// Purpose: Provide the node harness, a recording publish channel and a gated
// store.
// Dependencies: system-tests, cloudlink-core, cloudlink-store-sqlite
// ============================================================================

//! ## Overview
//! Shared helpers for cloudlink system-tests.
//! Invariants:
//! - Every harness owns its own SQLite database.
//! - Outbound messages are captured in publish order.

#![allow(dead_code, reason = "Shared helpers are reused across multiple test suites.")]

pub mod gated_store;
pub mod harness;
pub mod publisher;
