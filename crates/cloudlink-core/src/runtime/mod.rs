// crates/cloudlink-core/src/runtime/mod.rs
// ============================================================================
// Module: Cloudlink Runtime
// Description: Command queue, completion handles, node workers and registry.
// Purpose: Execute per-node synchronization work in strict FIFO order.
// Dependencies: crate::{core, interfaces}, tracing
// ============================================================================

//! ## Overview
//! Producers submit typed commands into a node's bounded queue; exactly one
//! worker thread per node drains it against the staging store and publishes
//! batches through the publish channel. The registry owns every worker and
//! routes inbound remote requests by remote node id.

// ============================================================================
// SECTION: Submodules
// ============================================================================

pub mod command;
pub mod completion;
pub mod error;
pub mod queue;
pub mod registry;
pub mod worker;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use command::Command;
pub use command::NodeInfoUpdate;
pub use command::Opcode;
pub use completion::CommandOutcome;
pub use completion::Completer;
pub use completion::CompletionHandle;
pub use completion::completion_pair;
pub use error::SyncError;
pub use queue::CommandQueue;
pub use queue::CommandReceiver;
pub use queue::DEFAULT_QUEUE_CAPACITY;
pub use queue::QueuedCommand;
pub use queue::SubmitMode;
pub use queue::command_queue;
pub use registry::NodeRegistry;
pub use worker::NodeIdentity;
pub use worker::Submission;
pub use worker::Worker;
pub use worker::WorkerConfig;
pub use worker::WorkerHandle;
pub use worker::WorkerPhase;
pub use worker::WorkerStats;
