// crates/cloudlink-core/src/core/mod.rs
// ============================================================================
// Module: Cloudlink Core Types
// Description: Identifiers, staging model and clock.
// Purpose: Provide stable, serializable types shared by every cloudlink crate.
// Dependencies: serde, uuid
// ============================================================================

//! ## Overview
//! Core types describe what a node stages and how it is tracked: identities,
//! stream records, batches, acknowledgements and stream summaries.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod identifiers;
pub mod model;
pub mod time;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use identifiers::BatchId;
pub use identifiers::EntityId;
pub use identifiers::NodeId;
pub use identifiers::RemoteNodeId;
pub use identifiers::SequenceId;
pub use identifiers::UniqueId;
pub use model::AckReport;
pub use model::AckTarget;
pub use model::BatchLimits;
pub use model::BatchOutcome;
pub use model::EntityType;
pub use model::NodeDescriptor;
pub use model::PruneReport;
pub use model::RecordStatus;
pub use model::StageOutcome;
pub use model::StageRequest;
pub use model::StagedRecord;
pub use model::Stream;
pub use model::StreamCursor;
pub use model::StreamStatus;
pub use model::SubmissionBatch;
pub use time::Clock;
pub use time::ManualClock;
pub use time::SystemClock;
