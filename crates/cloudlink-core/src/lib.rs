// crates/cloudlink-core/src/lib.rs
// ============================================================================
// Module: Cloudlink Core Library
// Description: Public API surface for the cloudlink synchronization core.
// Purpose: Expose identifiers, staging model, interfaces and the node runtime.
// Dependencies: crate::{core, interfaces, runtime}
// ============================================================================

//! ## Overview
//! Cloudlink core propagates a monitoring agent's chart, dimension, alert and
//! node metadata to a remote collector. Each node gets one worker draining a
//! bounded FIFO of typed commands against a durable staging store, which
//! sequences, deduplicates and batches records until the collector
//! acknowledges them. Storage and transport are reached only through the
//! [`StagingStore`] and [`PublishChannel`] interfaces.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod core;
pub mod interfaces;
pub mod runtime;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use crate::core::*;

pub use interfaces::BatchMessage;
pub use interfaces::OutboundMessage;
pub use interfaces::PublishChannel;
pub use interfaces::PublishError;
pub use interfaces::StagingStore;
pub use interfaces::StoreError;
pub use runtime::Command;
pub use runtime::CommandOutcome;
pub use runtime::CompletionHandle;
pub use runtime::NodeIdentity;
pub use runtime::NodeInfoUpdate;
pub use runtime::NodeRegistry;
pub use runtime::Opcode;
pub use runtime::SubmitMode;
pub use runtime::SyncError;
pub use runtime::Worker;
pub use runtime::WorkerConfig;
pub use runtime::WorkerHandle;
pub use runtime::WorkerPhase;
pub use runtime::WorkerStats;
