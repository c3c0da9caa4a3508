// crates/cloudlink-core/src/runtime/command.rs
// ============================================================================
// Module: Cloudlink Commands
// Description: Tagged command variants and their closed opcode set.
// Purpose: Carry typed work from producers to a node worker.
// Dependencies: crate::core, serde
// ============================================================================

//! ## Overview
//! Every unit of work a node worker performs is one [`Command`] variant. The
//! worker dispatches with an exhaustive `match`, so adding a variant forces a
//! handler. [`Opcode`] is the payload-free label used for logs and counters.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::core::AckTarget;
use crate::core::NodeDescriptor;
use crate::core::RemoteNodeId;
use crate::core::SequenceId;
use crate::core::StageRequest;

// ============================================================================
// SECTION: Opcodes
// ============================================================================

/// Closed set of worker opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Opcode {
    /// No operation.
    Noop,
    /// Stage an alert transition.
    AddAlert,
    /// Stage a chart definition.
    AddChart,
    /// Stage a dimension definition.
    AddDimension,
    /// Publish the alert stream health summary.
    AlarmHealthLog,
    /// Apply a chart stream acknowledgement.
    ChartAck,
    /// Verify node tables exist.
    Check,
    /// Bound the number of retained acknowledged rows.
    CheckRotation,
    /// Prune expired and superseded rows.
    Cleanup,
    /// Remove superseded chart rows.
    DedupChart,
    /// Drop node tables and stop the worker.
    DeleteHost,
    /// Record claim state and node metadata.
    NodeInfo,
    /// Submit the next alert batch.
    PushAlert,
    /// Publish alert configuration.
    PushAlertConfig,
    /// Submit the next chart batch.
    PushChart,
    /// Publish chart configuration.
    PushChartConfig,
    /// Replay the chart stream from a sequence id.
    ResetChart,
    /// Abandon open batches and republish node info.
    ResetNode,
    /// Drain and stop the worker.
    Shutdown,
    /// Publish the chart stream status.
    StatusChart,
    /// Recover stream counters from the store.
    SyncChartSeq,
    /// Periodic housekeeping tick.
    Timer,
    /// Refresh observable counters.
    UpdStats,
}

impl Opcode {
    /// Returns the stable opcode label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Noop => "NOOP",
            Self::AddAlert => "ADD_ALERT",
            Self::AddChart => "ADD_CHART",
            Self::AddDimension => "ADD_DIMENSION",
            Self::AlarmHealthLog => "ALARM_HEALTH_LOG",
            Self::ChartAck => "CHART_ACK",
            Self::Check => "CHECK",
            Self::CheckRotation => "CHECK_ROTATION",
            Self::Cleanup => "CLEANUP",
            Self::DedupChart => "DEDUP_CHART",
            Self::DeleteHost => "DELETE_HOST",
            Self::NodeInfo => "NODE_INFO",
            Self::PushAlert => "PUSH_ALERT",
            Self::PushAlertConfig => "PUSH_ALERT_CONFIG",
            Self::PushChart => "PUSH_CHART",
            Self::PushChartConfig => "PUSH_CHART_CONFIG",
            Self::ResetChart => "RESET_CHART",
            Self::ResetNode => "RESET_NODE",
            Self::Shutdown => "SHUTDOWN",
            Self::StatusChart => "STATUS_CHART",
            Self::SyncChartSeq => "SYNC_CHART_SEQ",
            Self::Timer => "TIMER",
            Self::UpdStats => "UPD_STATS",
        }
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// SECTION: Commands
// ============================================================================

/// Claim state and metadata update for a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfoUpdate {
    /// Remote node id assigned on claim; `None` leaves the claim unchanged.
    pub remote_node_id: Option<RemoteNodeId>,
    /// Replacement node descriptor; `None` keeps the current one.
    pub descriptor: Option<NodeDescriptor>,
}

/// Typed unit of work for a node worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    /// No operation.
    Noop,
    /// Stage an alert transition.
    AddAlert(StageRequest),
    /// Stage a chart definition.
    AddChart(StageRequest),
    /// Stage a dimension definition.
    AddDimension(StageRequest),
    /// Publish the alert stream health summary.
    AlarmHealthLog,
    /// Apply a chart stream acknowledgement.
    ChartAck(AckTarget),
    /// Verify node tables exist.
    Check,
    /// Bound the number of retained acknowledged rows.
    CheckRotation,
    /// Prune expired and superseded rows.
    Cleanup,
    /// Remove superseded chart rows.
    DedupChart,
    /// Drop node tables and stop the worker.
    DeleteHost,
    /// Record claim state and node metadata.
    NodeInfo(NodeInfoUpdate),
    /// Submit the next alert batch.
    PushAlert {
        /// Resume point requested by the collector.
        start_from: Option<SequenceId>,
    },
    /// Publish alert configuration.
    PushAlertConfig {
        /// Configuration hash requested by the collector.
        config_hash: String,
        /// Configuration payload.
        payload: Vec<u8>,
    },
    /// Submit the next chart batch.
    PushChart,
    /// Publish chart configuration.
    PushChartConfig {
        /// Configuration hash requested by the collector.
        config_hash: String,
        /// Configuration payload.
        payload: Vec<u8>,
    },
    /// Replay the chart stream from a sequence id.
    ResetChart {
        /// First sequence id to replay.
        start_from: SequenceId,
    },
    /// Abandon open batches and republish node info.
    ResetNode,
    /// Drain and stop the worker.
    Shutdown,
    /// Publish the chart stream status.
    StatusChart,
    /// Recover stream counters from the store.
    SyncChartSeq,
    /// Periodic housekeeping tick.
    Timer,
    /// Refresh observable counters.
    UpdStats,
}

impl Command {
    /// Returns the opcode of this command.
    #[must_use]
    pub const fn opcode(&self) -> Opcode {
        match self {
            Self::Noop => Opcode::Noop,
            Self::AddAlert(_) => Opcode::AddAlert,
            Self::AddChart(_) => Opcode::AddChart,
            Self::AddDimension(_) => Opcode::AddDimension,
            Self::AlarmHealthLog => Opcode::AlarmHealthLog,
            Self::ChartAck(_) => Opcode::ChartAck,
            Self::Check => Opcode::Check,
            Self::CheckRotation => Opcode::CheckRotation,
            Self::Cleanup => Opcode::Cleanup,
            Self::DedupChart => Opcode::DedupChart,
            Self::DeleteHost => Opcode::DeleteHost,
            Self::NodeInfo(_) => Opcode::NodeInfo,
            Self::PushAlert {
                ..
            } => Opcode::PushAlert,
            Self::PushAlertConfig {
                ..
            } => Opcode::PushAlertConfig,
            Self::PushChart => Opcode::PushChart,
            Self::PushChartConfig {
                ..
            } => Opcode::PushChartConfig,
            Self::ResetChart {
                ..
            } => Opcode::ResetChart,
            Self::ResetNode => Opcode::ResetNode,
            Self::Shutdown => Opcode::Shutdown,
            Self::StatusChart => Opcode::StatusChart,
            Self::SyncChartSeq => Opcode::SyncChartSeq,
            Self::Timer => Opcode::Timer,
            Self::UpdStats => Opcode::UpdStats,
        }
    }

    /// Returns true when the command still executes while the worker drains.
    #[must_use]
    pub const fn is_critical(&self) -> bool {
        matches!(self, Self::DeleteHost)
    }

    /// Returns true when the command ends the worker loop.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Shutdown | Self::DeleteHost)
    }
}
