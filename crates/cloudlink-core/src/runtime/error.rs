// crates/cloudlink-core/src/runtime/error.rs
// ============================================================================
// Module: Cloudlink Sync Errors
// Description: Error type shared by the queue, workers and registry.
// Purpose: Report submission, routing and lifecycle failures to callers.
// Dependencies: crate::interfaces, thiserror
// ============================================================================

//! ## Overview
//! [`SyncError`] is returned to producers by queue submission, routing and
//! lifecycle calls. Store and publish failures inside a worker are wrapped
//! here too so handlers can use `?`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

use crate::interfaces::PublishError;
use crate::interfaces::StoreError;

/// Synchronization runtime errors.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Non-blocking submission found the queue at capacity.
    #[error("command queue is full")]
    QueueFull,
    /// The worker is no longer accepting commands.
    #[error("node worker stopped")]
    WorkerStopped,
    /// No node matches the requested identity.
    #[error("node not found: {0}")]
    NotFound(String),
    /// Request is malformed or conflicts with current state.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    /// Staging store failure.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Publish channel failure.
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Worker thread could not be started or joined.
    #[error("worker thread error: {0}")]
    Thread(String),
}
