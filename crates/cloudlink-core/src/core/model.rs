// crates/cloudlink-core/src/core/model.rs
// ============================================================================
// Module: Cloudlink Staging Model
// Description: Streams, entity types, staged records, batches and reports.
// Purpose: Shared vocabulary between workers, stores and the transport.
// Dependencies: crate::core::identifiers, serde
// ============================================================================

//! ## Overview
//! A node synchronizes two independent streams. The charts stream carries
//! chart and dimension definitions; the alerts stream carries alert
//! transitions. Each stream owns its own sequence and batch counters, and
//! every staged record moves forward through `pending -> sent -> ack`.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::identifiers::BatchId;
use crate::core::identifiers::EntityId;
use crate::core::identifiers::SequenceId;
use crate::core::identifiers::UniqueId;

// ============================================================================
// SECTION: Streams and Entities
// ============================================================================

/// Independent sequenced stream of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stream {
    /// Chart and dimension metadata.
    Charts,
    /// Alert transitions.
    Alerts,
}

impl Stream {
    /// Every stream, in a stable order.
    pub const ALL: [Self; 2] = [Self::Charts, Self::Alerts];

    /// Returns the stable label used in table names and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Charts => "chart",
            Self::Alerts => "alert",
        }
    }
}

impl fmt::Display for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of entity carried by a staged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    /// Chart definition.
    Chart,
    /// Dimension definition (belongs to the charts stream).
    Dimension,
    /// Alert transition.
    Alert,
}

impl EntityType {
    /// Returns the stream this entity type is staged into.
    #[must_use]
    pub const fn stream(self) -> Stream {
        match self {
            Self::Chart | Self::Dimension => Stream::Charts,
            Self::Alert => Stream::Alerts,
        }
    }

    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Chart => "chart",
            Self::Dimension => "dimension",
            Self::Alert => "alert",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "chart" => Some(Self::Chart),
            "dimension" => Some(Self::Dimension),
            "alert" => Some(Self::Alert),
            _ => None,
        }
    }
}

/// Delivery status of a staged record.
///
/// # Invariants
/// - Transitions only move forward: `Pending -> Sent -> Ack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Staged, not yet handed to the transport.
    Pending,
    /// Handed to the transport in a batch, awaiting acknowledgement.
    Sent,
    /// Acknowledged by the remote collector.
    Ack,
}

impl RecordStatus {
    /// Returns the stable storage label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Ack => "ack",
        }
    }

    /// Parses a storage label.
    #[must_use]
    pub fn parse(label: &str) -> Option<Self> {
        match label {
            "pending" => Some(Self::Pending),
            "sent" => Some(Self::Sent),
            "ack" => Some(Self::Ack),
            _ => None,
        }
    }
}

// ============================================================================
// SECTION: Records
// ============================================================================

/// One durable staged row joined with its payload blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StagedRecord {
    /// Durable sequence id (primary ordering key).
    pub sequence_id: SequenceId,
    /// Entity identity.
    pub entity_id: EntityId,
    /// Entity type.
    pub entity_type: EntityType,
    /// Payload version currently referenced by this row.
    pub unique_id: UniqueId,
    /// Delivery status.
    pub status: RecordStatus,
    /// Batch that last carried this row; `None` while pending or abandoned.
    pub batch_id: Option<BatchId>,
    /// Creation time (unix seconds).
    pub date_created: u64,
    /// Time of the last dedup refresh (unix seconds).
    pub date_updated: Option<u64>,
    /// Time the row was last submitted (unix seconds).
    pub date_submitted: Option<u64>,
    /// Time the row was acknowledged (unix seconds).
    pub date_acked: Option<u64>,
    /// Number of stage calls folded into this row.
    pub update_count: u64,
    /// Payload bytes, when the blob is still present.
    pub payload: Option<Vec<u8>>,
}

/// Request to stage one entity version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRequest {
    /// Entity identity.
    pub entity_id: EntityId,
    /// Claim id the payload was produced under, if any.
    pub claim_id: Option<String>,
    /// Serialized entity payload.
    pub payload: Vec<u8>,
}

/// Result of a stage call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageOutcome {
    /// Sequence id assigned to (or retained by) the pending row.
    pub sequence_id: SequenceId,
    /// Update count after this call.
    pub update_count: u64,
    /// True when an existing pending row absorbed the call.
    pub deduplicated: bool,
}

// ============================================================================
// SECTION: Batches
// ============================================================================

/// Bounds applied when selecting rows for a batch.
///
/// # Invariants
/// - Both limits are greater than zero (validated by configuration).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLimits {
    /// Maximum records per published message.
    pub max_batch_size: usize,
    /// Maximum messages per batch.
    pub max_batch_count: usize,
}

impl BatchLimits {
    /// Returns the maximum number of rows one batch may select.
    #[must_use]
    pub const fn max_records(&self) -> usize {
        self.max_batch_size.saturating_mul(self.max_batch_count)
    }
}

impl Default for BatchLimits {
    fn default() -> Self {
        Self {
            max_batch_size: 20,
            max_batch_count: 5,
        }
    }
}

/// Ordered set of records submitted under one batch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionBatch {
    /// Stream the batch belongs to.
    pub stream: Stream,
    /// Batch identifier.
    pub batch_id: BatchId,
    /// Records in ascending sequence order.
    pub records: Vec<StagedRecord>,
}

impl SubmissionBatch {
    /// Returns the first sequence id in the batch.
    #[must_use]
    pub fn first_sequence_id(&self) -> Option<SequenceId> {
        self.records.first().map(|record| record.sequence_id)
    }

    /// Returns the last sequence id in the batch.
    #[must_use]
    pub fn last_sequence_id(&self) -> Option<SequenceId> {
        self.records.last().map(|record| record.sequence_id)
    }
}

/// Outcome of a batch start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOutcome {
    /// A new batch was opened.
    Started(SubmissionBatch),
    /// The previous batch still has unacknowledged rows.
    Blocked {
        /// Batch awaiting acknowledgement.
        open_batch: BatchId,
    },
    /// Nothing to submit.
    Idle,
}

/// Selection of rows an acknowledgement applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AckTarget {
    /// Every sent row of one entity.
    Identity {
        /// Entity identity.
        entity_id: EntityId,
    },
    /// Every sent row up to and including a sequence id.
    UpTo {
        /// Highest acknowledged sequence id.
        sequence_id: SequenceId,
    },
    /// Every sent row within an inclusive sequence range.
    Range {
        /// First sequence id.
        first: SequenceId,
        /// Last sequence id.
        last: SequenceId,
    },
    /// Every sent row carried by one batch.
    Batch {
        /// Batch identifier.
        batch_id: BatchId,
    },
}

/// Result of an acknowledgement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AckReport {
    /// Rows moved to `ack` by this call.
    pub acked: usize,
}

/// Result of a prune pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneReport {
    /// Acknowledged rows removed after the retention window.
    pub expired_acks: usize,
    /// Pending or sent rows removed because a newer submission superseded them.
    pub superseded: usize,
    /// Payload blobs no longer referenced by any row.
    pub orphan_payloads: usize,
}

// ============================================================================
// SECTION: Stream State
// ============================================================================

/// Durable counters recovered when a worker starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamCursor {
    /// Highest sequence id ever handed out.
    pub last_sequence_id: SequenceId,
    /// Highest batch id ever opened.
    pub last_batch_id: BatchId,
}

/// Point-in-time summary of one stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatus {
    /// Stream described.
    pub stream: Stream,
    /// Lowest sequence id still stored.
    pub first_sequence_id: Option<SequenceId>,
    /// Highest sequence id ever handed out.
    pub last_sequence_id: SequenceId,
    /// Rows in `pending`.
    pub pending: u64,
    /// Rows in `sent`.
    pub sent: u64,
    /// Rows in `ack`.
    pub acked: u64,
    /// Highest batch id ever opened.
    pub last_batch_id: BatchId,
    /// Batch awaiting acknowledgement, if any.
    pub open_batch_id: Option<BatchId>,
    /// Time the open batch was created (unix seconds).
    pub batch_created: Option<u64>,
}

// ============================================================================
// SECTION: Node Metadata
// ============================================================================

/// Descriptive node metadata published with NODE_INFO.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Hostname reported by the agent.
    pub hostname: String,
    /// Operating system label.
    pub os: String,
    /// Agent version string.
    pub agent_version: String,
    /// Free-form host labels.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}
