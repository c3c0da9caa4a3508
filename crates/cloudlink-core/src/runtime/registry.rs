// crates/cloudlink-core/src/runtime/registry.rs
// ============================================================================
// Module: Cloudlink Node Registry
// Description: Process-wide registry of active nodes and their workers.
// Purpose: Route commands by local or remote node identity.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! The registry is created once at startup and passed around explicitly.
//! Nodes are added when they connect, claimed when the collector assigns a
//! remote id, and removed by `DELETE_HOST`. Inbound remote requests are routed
//! through [`NodeRegistry::resolve_by_remote_id`]; a missing or malformed
//! remote id is a [`SyncError::NotFound`], never a fatal condition.
//!
//! The registry lock is never held while waiting on a worker queue.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::RwLock;

use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::AckTarget;
use crate::core::Clock;
use crate::core::NodeDescriptor;
use crate::core::NodeId;
use crate::core::RemoteNodeId;
use crate::core::SequenceId;
use crate::interfaces::PublishChannel;
use crate::interfaces::StagingStore;
use crate::runtime::command::Command;
use crate::runtime::command::NodeInfoUpdate;
use crate::runtime::completion::CommandOutcome;
use crate::runtime::error::SyncError;
use crate::runtime::queue::SubmitMode;
use crate::runtime::worker::NodeIdentity;
use crate::runtime::worker::Submission;
use crate::runtime::worker::Worker;
use crate::runtime::worker::WorkerConfig;
use crate::runtime::worker::WorkerHandle;
use crate::runtime::worker::WorkerStats;

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registered node and its worker.
struct NodeEntry {
    /// Remote node id once claimed.
    remote_node_id: Option<RemoteNodeId>,
    /// Worker handle.
    worker: Arc<WorkerHandle>,
}

/// Registry of active nodes.
pub struct NodeRegistry {
    /// Staging store shared by every worker.
    store: Arc<dyn StagingStore>,
    /// Publish channel shared by every worker.
    publisher: Arc<dyn PublishChannel>,
    /// Clock shared by every worker.
    clock: Arc<dyn Clock>,
    /// Worker configuration applied to new nodes.
    config: WorkerConfig,
    /// Active nodes keyed by local id.
    nodes: RwLock<BTreeMap<NodeId, NodeEntry>>,
}

impl NodeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(
        store: Arc<dyn StagingStore>,
        publisher: Arc<dyn PublishChannel>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            publisher,
            clock,
            config,
            nodes: RwLock::new(BTreeMap::new()),
        }
    }

    /// Starts a worker for a node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] when the node is already
    /// registered, or the worker startup error.
    pub fn add_node(&self, identity: NodeIdentity) -> Result<(), SyncError> {
        let node_id = identity.node_id;
        let remote_node_id = identity.remote_node_id;
        if self.nodes.read().map_err(|_| poisoned())?.contains_key(&node_id) {
            return Err(already_registered(&node_id));
        }
        // Table setup runs without the registry lock held.
        let worker = Worker::spawn(
            identity,
            Arc::clone(&self.store),
            Arc::clone(&self.publisher),
            Arc::clone(&self.clock),
            self.config,
        )?;
        let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
        if nodes.contains_key(&node_id) {
            drop(nodes);
            warn!(node_id = %node_id, "concurrent registration won; stopping duplicate worker");
            worker.shutdown()?;
            return Err(already_registered(&node_id));
        }
        nodes.insert(
            node_id,
            NodeEntry {
                remote_node_id,
                worker: Arc::new(worker),
            },
        );
        drop(nodes);
        info!(node_id = %node_id, "node registered");
        Ok(())
    }

    /// Records the remote id assigned to a node and forwards it to the worker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown node, or the submission
    /// error.
    pub fn claim(
        &self,
        node_id: &NodeId,
        remote_node_id: RemoteNodeId,
        descriptor: Option<NodeDescriptor>,
    ) -> Result<u64, SyncError> {
        let worker = {
            let mut nodes = self.nodes.write().map_err(|_| poisoned())?;
            let entry = nodes.get_mut(node_id).ok_or_else(|| not_found(node_id))?;
            entry.remote_node_id = Some(remote_node_id);
            Arc::clone(&entry.worker)
        };
        worker.submit(
            Command::NodeInfo(NodeInfoUpdate {
                remote_node_id: Some(remote_node_id),
                descriptor,
            }),
            SubmitMode::Blocking,
        )
    }

    /// Deletes a node: waits for `DELETE_HOST` to be applied, joins the
    /// worker and forgets the node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown node, or the submission
    /// or join error.
    pub fn remove_node(&self, node_id: &NodeId) -> Result<CommandOutcome, SyncError> {
        let worker = self.worker(node_id)?;
        let outcome = worker.submit_and_wait(Command::DeleteHost)?;
        worker.join()?;
        self.nodes.write().map_err(|_| poisoned())?.remove(node_id);
        info!(node_id = %node_id, outcome = outcome_label(&outcome), "node removed");
        Ok(outcome)
    }

    /// Returns the worker of a node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] for an unknown node.
    pub fn worker(&self, node_id: &NodeId) -> Result<Arc<WorkerHandle>, SyncError> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        nodes.get(node_id).map(|entry| Arc::clone(&entry.worker)).ok_or_else(|| not_found(node_id))
    }

    /// Submits a command to a node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`], [`SyncError::QueueFull`] or
    /// [`SyncError::WorkerStopped`].
    pub fn submit(
        &self,
        node_id: &NodeId,
        command: Command,
        mode: SubmitMode,
    ) -> Result<u64, SyncError> {
        self.worker(node_id)?.submit(command, mode)
    }

    /// Submits a command to a node and returns its completion.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`], [`SyncError::QueueFull`] or
    /// [`SyncError::WorkerStopped`].
    pub fn submit_tracked(
        &self,
        node_id: &NodeId,
        command: Command,
        mode: SubmitMode,
    ) -> Result<Submission, SyncError> {
        self.worker(node_id)?.submit_tracked(command, mode)
    }

    /// Submits a command to a node and blocks until it is processed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] or [`SyncError::WorkerStopped`].
    pub fn submit_and_wait(
        &self,
        node_id: &NodeId,
        command: Command,
    ) -> Result<CommandOutcome, SyncError> {
        self.worker(node_id)?.submit_and_wait(command)
    }

    // ------------------------------------------------------------------------
    // Remote Routing
    // ------------------------------------------------------------------------

    /// Resolves a remote node id to a local node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] when the id is absent, malformed, or
    /// matches no claimed node.
    pub fn resolve_by_remote_id(&self, remote: Option<&str>) -> Result<NodeId, SyncError> {
        let Some(remote_node_id) = RemoteNodeId::parse_lenient(remote) else {
            return Err(SyncError::NotFound("remote node id missing or malformed".into()));
        };
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        nodes
            .iter()
            .find(|(_, entry)| entry.remote_node_id == Some(remote_node_id))
            .map(|(node_id, _)| *node_id)
            .ok_or_else(|| SyncError::NotFound(format!("no node claimed as {remote_node_id}")))
    }

    /// Routes a remote alert resume request to the owning worker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] or the submission error.
    pub fn request_alert_resume(
        &self,
        remote: Option<&str>,
        start_from: SequenceId,
    ) -> Result<u64, SyncError> {
        let node_id = self.routed(remote, "alert resume")?;
        self.submit(
            &node_id,
            Command::PushAlert {
                start_from: Some(start_from),
            },
            SubmitMode::Blocking,
        )
    }

    /// Routes a remote chart replay request to the owning worker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] or the submission error.
    pub fn request_chart_reset(
        &self,
        remote: Option<&str>,
        start_from: SequenceId,
    ) -> Result<u64, SyncError> {
        let node_id = self.routed(remote, "chart reset")?;
        self.submit(
            &node_id,
            Command::ResetChart {
                start_from,
            },
            SubmitMode::Blocking,
        )
    }

    /// Routes a chart stream acknowledgement to the owning worker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotFound`] or the submission error.
    pub fn deliver_chart_ack(
        &self,
        remote: Option<&str>,
        target: AckTarget,
    ) -> Result<u64, SyncError> {
        let node_id = self.routed(remote, "chart ack")?;
        self.submit(&node_id, Command::ChartAck(target), SubmitMode::Blocking)
    }

    /// Resolves a remote id, logging rejected requests.
    fn routed(&self, remote: Option<&str>, request: &'static str) -> Result<NodeId, SyncError> {
        self.resolve_by_remote_id(remote).inspect_err(|err| {
            warn!(request, error = %err, "rejected remote request");
        })
    }

    // ------------------------------------------------------------------------
    // Fan-out
    // ------------------------------------------------------------------------

    /// Sends a non-blocking `TIMER` to every worker; full queues are skipped.
    ///
    /// Returns the number of workers that accepted the tick.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Thread`] when the registry lock is poisoned.
    pub fn tick_all(&self) -> Result<usize, SyncError> {
        let mut accepted = 0;
        for worker in self.workers()? {
            match worker.submit(Command::Timer, SubmitMode::NonBlocking) {
                Ok(_) => accepted += 1,
                Err(SyncError::QueueFull) => {
                    debug!(node_id = %worker.node_id(), "queue full; timer tick skipped");
                }
                Err(err) => {
                    warn!(node_id = %worker.node_id(), error = %err, "timer tick rejected");
                }
            }
        }
        Ok(accepted)
    }

    /// Returns the ids of every registered node.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Thread`] when the registry lock is poisoned.
    pub fn node_ids(&self) -> Result<Vec<NodeId>, SyncError> {
        Ok(self.nodes.read().map_err(|_| poisoned())?.keys().copied().collect())
    }

    /// Returns statistics for every registered worker.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Thread`] when the registry lock is poisoned.
    pub fn stats(&self) -> Result<Vec<WorkerStats>, SyncError> {
        Ok(self.workers()?.iter().map(|worker| worker.stats()).collect())
    }

    /// Drains and joins every worker, emptying the registry.
    ///
    /// # Errors
    ///
    /// Returns the first worker shutdown error; every worker is still asked
    /// to stop.
    pub fn shutdown(&self) -> Result<(), SyncError> {
        let nodes = std::mem::take(&mut *self.nodes.write().map_err(|_| poisoned())?);
        let mut first_error = None;
        for (node_id, entry) in nodes {
            if let Err(err) = entry.worker.shutdown() {
                warn!(node_id = %node_id, error = %err, "worker shutdown failed");
                first_error.get_or_insert(err);
            }
        }
        info!("node registry shut down");
        first_error.map_or(Ok(()), Err)
    }

    /// Snapshots the worker handles without holding the lock afterwards.
    fn workers(&self) -> Result<Vec<Arc<WorkerHandle>>, SyncError> {
        let nodes = self.nodes.read().map_err(|_| poisoned())?;
        Ok(nodes.values().map(|entry| Arc::clone(&entry.worker)).collect())
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Error for a poisoned registry lock.
fn poisoned() -> SyncError {
    SyncError::Thread("node registry lock poisoned".into())
}

/// Error for a node id that already has a worker.
fn already_registered(node_id: &NodeId) -> SyncError {
    SyncError::InvalidRequest(format!("node {node_id} already registered"))
}

/// Error for an unknown local node.
fn not_found(node_id: &NodeId) -> SyncError {
    SyncError::NotFound(format!("node {node_id} is not registered"))
}

/// Short label for an outcome in logs.
const fn outcome_label(outcome: &CommandOutcome) -> &'static str {
    match outcome {
        CommandOutcome::Completed => "completed",
        CommandOutcome::Failed(_) => "failed",
        CommandOutcome::Cancelled => "cancelled",
    }
}
