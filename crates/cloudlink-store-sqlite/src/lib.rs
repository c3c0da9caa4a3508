// crates/cloudlink-store-sqlite/src/lib.rs
// ============================================================================
// Module: SQLite Staging Store
// Description: Durable StagingStore backend using SQLite WAL.
// Purpose: Persist staged sync records, payloads and batch counters.
// Dependencies: cloudlink-core, rusqlite
// ============================================================================

//! ## Overview
//! This crate provides a SQLite-backed [`StagingStore`] implementation. Each
//! node gets its own record, payload and latest-submission tables per stream,
//! so sequence ids survive restarts and acknowledged rows can be pruned
//! without touching other nodes. Security posture: storage inputs are
//! untrusted and parsed back into typed values.
//!
//! [`StagingStore`]: cloudlink_core::StagingStore

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod store;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use store::SCHEMA_VERSION;
pub use store::SqliteStagingStore;
pub use store::SqliteStoreConfig;
pub use store::SqliteStoreError;
pub use store::SqliteStoreMode;
pub use store::SqliteSyncMode;
