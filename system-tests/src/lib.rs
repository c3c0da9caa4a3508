// system-tests/src/lib.rs
// ============================================================================
// Module: Cloudlink System Tests Library
// Description: Shared configuration for system test scenarios.
// Purpose: Provide common settings for cloudlink system-test binaries.
// Dependencies: std
// ============================================================================

//! ## Overview
//! This crate hosts shared configuration used by the cloudlink system-tests
//! binaries in `system-tests/tests`. The suites drive real node workers
//! against an on-disk SQLite staging store.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;
