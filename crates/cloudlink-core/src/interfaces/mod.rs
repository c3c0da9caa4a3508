// crates/cloudlink-core/src/interfaces/mod.rs
// ============================================================================
// Module: Cloudlink Interfaces
// Description: Durable staging store and outbound publish contracts.
// Purpose: Define the seams between node workers, storage and transport.
// Dependencies: crate::core, serde, thiserror
// ============================================================================

//! ## Overview
//! Workers never talk to a database or a socket directly. They stage and
//! batch through a [`StagingStore`] and hand finished messages to a
//! [`PublishChannel`]. Every store operation is scoped to one node, and every
//! outbound message names both the local node id and the claimed remote id.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Serialize;
use thiserror::Error;

use crate::core::AckReport;
use crate::core::AckTarget;
use crate::core::BatchId;
use crate::core::BatchLimits;
use crate::core::BatchOutcome;
use crate::core::EntityType;
use crate::core::NodeDescriptor;
use crate::core::NodeId;
use crate::core::PruneReport;
use crate::core::RemoteNodeId;
use crate::core::SequenceId;
use crate::core::StageOutcome;
use crate::core::StageRequest;
use crate::core::StagedRecord;
use crate::core::Stream;
use crate::core::StreamCursor;
use crate::core::StreamStatus;

// ============================================================================
// SECTION: Staging Store
// ============================================================================

/// Staging store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Store I/O error.
    #[error("staging store io error: {0}")]
    Io(String),
    /// Backend database error.
    #[error("staging store db error: {0}")]
    Db(String),
    /// Stored data fails integrity checks.
    #[error("staging store corruption: {0}")]
    Corrupt(String),
    /// Stored schema version is incompatible.
    #[error("staging store version mismatch: {0}")]
    VersionMismatch(String),
    /// Request or stored value is invalid.
    #[error("staging store invalid data: {0}")]
    Invalid(String),
    /// Node tables do not exist.
    #[error("staging tables missing for node {0}")]
    MissingNode(String),
}

/// Durable per-node staging, sequencing and batch bookkeeping.
///
/// # Invariants
/// - Sequence ids are assigned by the store, strictly increasing per node and
///   stream, and never reused after deletion.
/// - At most one pending row exists per entity and stream.
/// - Status only moves forward: `pending -> sent -> ack`.
pub trait StagingStore: Send + Sync {
    /// Creates the node's tables when absent.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when table creation fails.
    fn ensure_node(&self, node: &NodeId) -> Result<(), StoreError>;

    /// Reports whether the node's tables exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the catalog cannot be read.
    fn node_exists(&self, node: &NodeId) -> Result<bool, StoreError>;

    /// Drops every table and stream row belonging to the node.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the drop fails.
    fn drop_node(&self, node: &NodeId) -> Result<(), StoreError>;

    /// Stages one entity version into the stream of `entity_type`.
    ///
    /// A pending row for the same entity absorbs the call: its payload
    /// reference is replaced and its update count incremented.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the write fails.
    fn stage(
        &self,
        node: &NodeId,
        entity_type: EntityType,
        request: &StageRequest,
        now: u64,
    ) -> Result<StageOutcome, StoreError>;

    /// Opens a new batch from pending rows and rows of abandoned batches.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the selection or update fails.
    fn start_batch(
        &self,
        node: &NodeId,
        stream: Stream,
        limits: BatchLimits,
        now: u64,
    ) -> Result<BatchOutcome, StoreError>;

    /// Moves matching `sent` rows to `ack`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn ack(
        &self,
        node: &NodeId,
        stream: Stream,
        target: AckTarget,
        now: u64,
    ) -> Result<AckReport, StoreError>;

    /// Detaches the open batch so its rows are eligible for the next batch.
    ///
    /// Returns the abandoned batch id, if one was open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the update fails.
    fn abandon_batch(&self, node: &NodeId, stream: Stream) -> Result<Option<BatchId>, StoreError>;

    /// Removes expired acknowledgements, superseded rows and orphan payloads.
    ///
    /// Acknowledged rows whose `date_acked` is older than `ack_cutoff` expire.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when a delete fails.
    fn prune(
        &self,
        node: &NodeId,
        stream: Stream,
        ack_cutoff: u64,
    ) -> Result<PruneReport, StoreError>;

    /// Removes rows superseded by a newer submission of the same entity.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn dedup(&self, node: &NodeId, stream: Stream) -> Result<usize, StoreError>;

    /// Keeps at most `max_rows` acknowledged rows, deleting the oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the delete fails.
    fn enforce_ack_limit(
        &self,
        node: &NodeId,
        stream: Stream,
        max_rows: usize,
    ) -> Result<usize, StoreError>;

    /// Re-batches every row at or above `start` under a fresh batch id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the selection or update fails.
    fn resume_from(
        &self,
        node: &NodeId,
        stream: Stream,
        start: SequenceId,
        now: u64,
    ) -> Result<BatchOutcome, StoreError>;

    /// Returns the durable counters of a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the counters cannot be read.
    fn cursor(&self, node: &NodeId, stream: Stream) -> Result<StreamCursor, StoreError>;

    /// Returns a point-in-time summary of a stream.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the summary cannot be read.
    fn status(&self, node: &NodeId, stream: Stream) -> Result<StreamStatus, StoreError>;

    /// Returns every stored row of a stream in ascending sequence order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] when the rows cannot be read.
    fn records(&self, node: &NodeId, stream: Stream) -> Result<Vec<StagedRecord>, StoreError>;
}

// ============================================================================
// SECTION: Publish Channel
// ============================================================================

/// Publish channel errors.
#[derive(Debug, Error)]
pub enum PublishError {
    /// Transport is not connected.
    #[error("publish channel unavailable: {0}")]
    Unavailable(String),
    /// Transport rejected the message.
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// One chunk of a submission batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchMessage {
    /// Local node id.
    pub node_id: NodeId,
    /// Claimed remote node id.
    pub remote_node_id: RemoteNodeId,
    /// Batch the chunk belongs to.
    pub batch_id: BatchId,
    /// Zero-based chunk index within the batch.
    pub chunk: usize,
    /// Number of chunks in the batch.
    pub chunks: usize,
    /// Records in ascending sequence order.
    pub records: Vec<StagedRecord>,
}

/// Message handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Chart and dimension updates.
    ChartBatch(BatchMessage),
    /// Alert transitions.
    AlertBatch(BatchMessage),
    /// Notice that the chart stream is replayed from a sequence id.
    ChartReset {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// First replayed sequence id.
        start_from: SequenceId,
    },
    /// Node metadata.
    NodeInfo {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// Node descriptor.
        descriptor: NodeDescriptor,
    },
    /// Charts stream summary.
    StreamStatus {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// Stream summary.
        status: StreamStatus,
    },
    /// Alerts stream health summary.
    AlertHealthLog {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// Stream summary.
        status: StreamStatus,
    },
    /// Alert configuration payload.
    AlertConfig {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// Configuration hash requested by the collector.
        config_hash: String,
        /// Configuration payload.
        payload: Vec<u8>,
    },
    /// Chart configuration payload.
    ChartConfig {
        /// Local node id.
        node_id: NodeId,
        /// Claimed remote node id.
        remote_node_id: RemoteNodeId,
        /// Configuration hash requested by the collector.
        config_hash: String,
        /// Configuration payload.
        payload: Vec<u8>,
    },
}

impl OutboundMessage {
    /// Returns the stable message kind label.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::ChartBatch(_) => "chart_batch",
            Self::AlertBatch(_) => "alert_batch",
            Self::ChartReset {
                ..
            } => "chart_reset",
            Self::NodeInfo {
                ..
            } => "node_info",
            Self::StreamStatus {
                ..
            } => "stream_status",
            Self::AlertHealthLog {
                ..
            } => "alert_health_log",
            Self::AlertConfig {
                ..
            } => "alert_config",
            Self::ChartConfig {
                ..
            } => "chart_config",
        }
    }

    /// Returns the local node id the message belongs to.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        match self {
            Self::ChartBatch(message) | Self::AlertBatch(message) => &message.node_id,
            Self::ChartReset {
                node_id, ..
            }
            | Self::NodeInfo {
                node_id, ..
            }
            | Self::StreamStatus {
                node_id, ..
            }
            | Self::AlertHealthLog {
                node_id, ..
            }
            | Self::AlertConfig {
                node_id, ..
            }
            | Self::ChartConfig {
                node_id, ..
            } => node_id,
        }
    }
}

/// Transport that delivers outbound messages to the remote collector.
pub trait PublishChannel: Send + Sync {
    /// Publishes one message.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError`] when the message cannot be delivered.
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError>;
}
