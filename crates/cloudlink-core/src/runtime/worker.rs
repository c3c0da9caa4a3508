// crates/cloudlink-core/src/runtime/worker.rs
// ============================================================================
// Module: Cloudlink Node Worker
// Description: Per-node worker thread, opcode dispatch and lifecycle.
// Purpose: Execute a node's commands in FIFO order against the staging store.
// Dependencies: crate::{core, interfaces, runtime}, tracing
// ============================================================================

//! ## Overview
//! One worker runs per monitored node on a dedicated OS thread. It moves
//! through `Starting -> Running -> Draining -> Stopped`:
//! - `Starting` creates the node's staging tables and recovers its counters
//!   before any thread is started, so a broken store never yields a worker.
//! - `Running` dequeues, dispatches on the [`Command`] variant, and fires the
//!   command's completion.
//! - `Draining` follows `SHUTDOWN` or `DELETE_HOST`: queued critical commands
//!   still run; everything else is cancelled with its completion signaled.
//!
//! Handler failures never stop the loop. They are counted, logged with the
//! node id and reported to the waiting producer as a failed outcome.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU8;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::thread;
use std::thread::JoinHandle;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::core::AckTarget;
use crate::core::BatchId;
use crate::core::BatchLimits;
use crate::core::BatchOutcome;
use crate::core::Clock;
use crate::core::EntityType;
use crate::core::NodeDescriptor;
use crate::core::NodeId;
use crate::core::RemoteNodeId;
use crate::core::SequenceId;
use crate::core::StageRequest;
use crate::core::Stream;
use crate::core::SubmissionBatch;
use crate::interfaces::BatchMessage;
use crate::interfaces::OutboundMessage;
use crate::interfaces::PublishChannel;
use crate::interfaces::StagingStore;
use crate::runtime::command::Command;
use crate::runtime::command::NodeInfoUpdate;
use crate::runtime::command::Opcode;
use crate::runtime::completion::CommandOutcome;
use crate::runtime::completion::CompletionHandle;
use crate::runtime::completion::completion_pair;
use crate::runtime::error::SyncError;
use crate::runtime::queue::CommandQueue;
use crate::runtime::queue::CommandReceiver;
use crate::runtime::queue::DEFAULT_QUEUE_CAPACITY;
use crate::runtime::queue::QueuedCommand;
use crate::runtime::queue::SubmitMode;
use crate::runtime::queue::command_queue;

// ============================================================================
// SECTION: Configuration
// ============================================================================

/// Default delay before the first cleanup after startup (seconds).
pub const DEFAULT_CLEANUP_FIRST_SECS: u64 = 60;
/// Default interval between cleanups (seconds).
pub const DEFAULT_CLEANUP_INTERVAL_SECS: u64 = 3600;
/// Default retention of acknowledged rows (seconds).
pub const DEFAULT_ACK_RETENTION_SECS: u64 = 600;
/// Default age after which an unacknowledged batch is abandoned (seconds).
pub const DEFAULT_BATCH_LIFETIME_SECS: u64 = 300;
/// Default maximum number of acknowledged rows kept per stream.
pub const DEFAULT_MAX_ACKED_ROWS: usize = 10_000;

/// Worker tuning knobs.
///
/// # Invariants
/// - `queue_capacity`, both batch limits and `max_acked_rows` are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Command queue capacity.
    pub queue_capacity: usize,
    /// Batch selection bounds.
    pub batch_limits: BatchLimits,
    /// Age after which an unacknowledged batch is abandoned (seconds).
    pub batch_lifetime_secs: u64,
    /// Delay before the first cleanup after startup (seconds).
    pub cleanup_first_secs: u64,
    /// Interval between cleanups (seconds).
    pub cleanup_interval_secs: u64,
    /// Retention of acknowledged rows (seconds).
    pub ack_retention_secs: u64,
    /// Maximum acknowledged rows kept per stream.
    pub max_acked_rows: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            batch_limits: BatchLimits::default(),
            batch_lifetime_secs: DEFAULT_BATCH_LIFETIME_SECS,
            cleanup_first_secs: DEFAULT_CLEANUP_FIRST_SECS,
            cleanup_interval_secs: DEFAULT_CLEANUP_INTERVAL_SECS,
            ack_retention_secs: DEFAULT_ACK_RETENTION_SECS,
            max_acked_rows: DEFAULT_MAX_ACKED_ROWS,
        }
    }
}

impl WorkerConfig {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidRequest`] when a limit is zero.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.queue_capacity == 0 {
            return Err(SyncError::InvalidRequest("queue_capacity must be greater than zero".into()));
        }
        if self.batch_limits.max_batch_size == 0 || self.batch_limits.max_batch_count == 0 {
            return Err(SyncError::InvalidRequest("batch limits must be greater than zero".into()));
        }
        if self.max_acked_rows == 0 {
            return Err(SyncError::InvalidRequest("max_acked_rows must be greater than zero".into()));
        }
        Ok(())
    }
}

/// Identity and metadata a worker starts with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeIdentity {
    /// Local node id.
    pub node_id: NodeId,
    /// Remote node id, when the node is already claimed.
    pub remote_node_id: Option<RemoteNodeId>,
    /// Node metadata.
    pub descriptor: NodeDescriptor,
}

// ============================================================================
// SECTION: Observable State
// ============================================================================

/// Lifecycle phase of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Tables are being prepared.
    Starting,
    /// Processing commands.
    Running,
    /// Cancelling remaining non-critical commands.
    Draining,
    /// Thread exited.
    Stopped,
}

impl WorkerPhase {
    /// Encodes the phase for atomic storage.
    const fn to_u8(self) -> u8 {
        match self {
            Self::Starting => 0,
            Self::Running => 1,
            Self::Draining => 2,
            Self::Stopped => 3,
        }
    }

    /// Decodes an atomically stored phase.
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Starting,
            1 => Self::Running,
            2 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Atomics shared between a worker thread and its handle.
#[derive(Debug, Default)]
struct WorkerShared {
    /// Encoded [`WorkerPhase`].
    phase: AtomicU8,
    /// True once a remote node id is known.
    claimed: AtomicBool,
    /// Commands executed (successfully or not).
    processed: AtomicU64,
    /// Commands cancelled during drain.
    cancelled: AtomicU64,
    /// Failed command executions.
    errors: AtomicU64,
    /// Chart and dimension stage calls.
    chart_updates: AtomicU64,
    /// Alert stage calls.
    alert_updates: AtomicU64,
    /// Last chart stream sequence id.
    chart_sequence_id: AtomicU64,
    /// Last alert stream sequence id.
    alert_sequence_id: AtomicU64,
    /// Last chart batch id.
    batch_id: AtomicU64,
    /// Last alert batch id.
    alerts_batch_id: AtomicU64,
    /// Pending chart rows at the last stats refresh.
    chart_pending: AtomicU64,
    /// Pending alert rows at the last stats refresh.
    alert_pending: AtomicU64,
    /// Worker startup time (unix seconds).
    startup_time: AtomicU64,
}

impl WorkerShared {
    /// Stores a new phase.
    fn set_phase(&self, phase: WorkerPhase) {
        self.phase.store(phase.to_u8(), Ordering::SeqCst);
    }

    /// Loads the current phase.
    fn phase(&self) -> WorkerPhase {
        WorkerPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }
}

/// Point-in-time worker statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStats {
    /// Local node id.
    pub node_id: NodeId,
    /// Lifecycle phase.
    pub phase: WorkerPhase,
    /// Commands queued and not yet dequeued.
    pub queue_size: usize,
    /// True once a remote node id is known.
    pub claimed: bool,
    /// Commands executed.
    pub processed: u64,
    /// Commands cancelled during drain.
    pub cancelled: u64,
    /// Failed command executions.
    pub errors: u64,
    /// Chart and dimension stage calls.
    pub chart_updates: u64,
    /// Alert stage calls.
    pub alert_updates: u64,
    /// Last chart stream sequence id.
    pub chart_sequence_id: SequenceId,
    /// Last alert stream sequence id.
    pub alert_sequence_id: SequenceId,
    /// Last chart batch id.
    pub batch_id: BatchId,
    /// Last alert batch id.
    pub alerts_batch_id: BatchId,
    /// Pending chart rows at the last stats refresh.
    pub chart_pending: u64,
    /// Pending alert rows at the last stats refresh.
    pub alert_pending: u64,
    /// Worker startup time (unix seconds).
    pub startup_time: u64,
}

// ============================================================================
// SECTION: Worker Handle
// ============================================================================

/// Submitted command paired with its completion.
#[derive(Debug)]
pub struct Submission {
    /// Queue ticket number.
    pub ticket: u64,
    /// Completion fired once the command is processed or cancelled.
    pub completion: CompletionHandle,
}

/// Producer-side handle to a running worker.
#[derive(Debug)]
pub struct WorkerHandle {
    /// Local node id.
    node_id: NodeId,
    /// Producer half of the command queue.
    queue: CommandQueue,
    /// Atomics shared with the worker thread.
    shared: Arc<WorkerShared>,
    /// Join handle, taken on the first join.
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Returns the local node id.
    #[must_use]
    pub const fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Returns the current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> WorkerPhase {
        self.shared.phase()
    }

    /// Enqueues a command without a completion.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] or [`SyncError::WorkerStopped`].
    pub fn submit(&self, command: Command, mode: SubmitMode) -> Result<u64, SyncError> {
        self.queue.enqueue(command, None, mode)
    }

    /// Enqueues a command and returns a handle to wait on.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] or [`SyncError::WorkerStopped`].
    pub fn submit_tracked(
        &self,
        command: Command,
        mode: SubmitMode,
    ) -> Result<Submission, SyncError> {
        let (completer, completion) = completion_pair();
        let ticket = self.queue.enqueue(command, Some(completer), mode)?;
        Ok(Submission {
            ticket,
            completion,
        })
    }

    /// Enqueues a command (blocking) and waits for its outcome.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::WorkerStopped`] when the worker is gone.
    pub fn submit_and_wait(&self, command: Command) -> Result<CommandOutcome, SyncError> {
        let submission = self.submit_tracked(command, SubmitMode::Blocking)?;
        Ok(submission.completion.wait())
    }

    /// Requests a drain and waits for the thread to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Thread`] when the worker thread panicked.
    pub fn shutdown(&self) -> Result<(), SyncError> {
        match self.queue.enqueue(Command::Shutdown, None, SubmitMode::Blocking) {
            Ok(_) | Err(SyncError::WorkerStopped) => {}
            Err(err) => return Err(err),
        }
        self.join()
    }

    /// Waits for the worker thread to exit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Thread`] when the worker thread panicked.
    pub fn join(&self) -> Result<(), SyncError> {
        let handle = self
            .thread
            .lock()
            .map_err(|_| SyncError::Thread("worker join mutex poisoned".into()))?
            .take();
        if let Some(handle) = handle {
            handle
                .join()
                .map_err(|_| SyncError::Thread(format!("worker for node {} panicked", self.node_id)))?;
        }
        Ok(())
    }

    /// Returns a statistics snapshot.
    #[must_use]
    pub fn stats(&self) -> WorkerStats {
        let shared = &self.shared;
        WorkerStats {
            node_id: self.node_id,
            phase: shared.phase(),
            queue_size: self.queue.depth(),
            claimed: shared.claimed.load(Ordering::SeqCst),
            processed: shared.processed.load(Ordering::SeqCst),
            cancelled: shared.cancelled.load(Ordering::SeqCst),
            errors: shared.errors.load(Ordering::SeqCst),
            chart_updates: shared.chart_updates.load(Ordering::SeqCst),
            alert_updates: shared.alert_updates.load(Ordering::SeqCst),
            chart_sequence_id: SequenceId::new(shared.chart_sequence_id.load(Ordering::SeqCst)),
            alert_sequence_id: SequenceId::new(shared.alert_sequence_id.load(Ordering::SeqCst)),
            batch_id: BatchId::new(shared.batch_id.load(Ordering::SeqCst)),
            alerts_batch_id: BatchId::new(shared.alerts_batch_id.load(Ordering::SeqCst)),
            chart_pending: shared.chart_pending.load(Ordering::SeqCst),
            alert_pending: shared.alert_pending.load(Ordering::SeqCst),
            startup_time: shared.startup_time.load(Ordering::SeqCst),
        }
    }
}

// ============================================================================
// SECTION: Worker
// ============================================================================

/// Worker-owned mutable state of one node.
struct WorkerState {
    /// Local node id.
    node_id: NodeId,
    /// Remote node id once claimed.
    remote_node_id: Option<RemoteNodeId>,
    /// Node metadata published with node info.
    descriptor: NodeDescriptor,
    /// Last chart stream sequence id.
    chart_sequence_id: SequenceId,
    /// Last alert stream sequence id.
    alert_sequence_id: SequenceId,
    /// Last chart batch id.
    batch_id: BatchId,
    /// Last alert batch id.
    alerts_batch_id: BatchId,
    /// Remote-requested alert resume point, consumed by the next push.
    alerts_start_seq_id: Option<SequenceId>,
    /// Earliest time the next cleanup may run (unix seconds).
    cleanup_after: u64,
}

/// Per-node worker executing commands against the staging store.
pub struct Worker {
    /// Mutable node state.
    state: WorkerState,
    /// Durable staging store.
    store: Arc<dyn StagingStore>,
    /// Outbound transport.
    publisher: Arc<dyn PublishChannel>,
    /// Time source.
    clock: Arc<dyn Clock>,
    /// Tuning knobs.
    config: WorkerConfig,
    /// Atomics shared with the handle.
    shared: Arc<WorkerShared>,
}

impl Worker {
    /// Prepares the node's tables, recovers its counters and starts the
    /// worker thread.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the configuration is invalid, the store
    /// cannot be prepared, or the thread cannot be spawned. No thread is left
    /// running on error.
    pub fn spawn(
        identity: NodeIdentity,
        store: Arc<dyn StagingStore>,
        publisher: Arc<dyn PublishChannel>,
        clock: Arc<dyn Clock>,
        config: WorkerConfig,
    ) -> Result<WorkerHandle, SyncError> {
        config.validate()?;
        let shared = Arc::new(WorkerShared::default());
        shared.set_phase(WorkerPhase::Starting);

        let node_id = identity.node_id;
        store.ensure_node(&node_id)?;
        let startup_time = clock.now_unix_secs();
        let (queue, receiver) = command_queue(config.queue_capacity)?;

        let mut worker = Self {
            state: WorkerState {
                node_id,
                remote_node_id: identity.remote_node_id,
                descriptor: identity.descriptor,
                chart_sequence_id: SequenceId::default(),
                alert_sequence_id: SequenceId::default(),
                batch_id: BatchId::default(),
                alerts_batch_id: BatchId::default(),
                alerts_start_seq_id: None,
                cleanup_after: startup_time.saturating_add(config.cleanup_first_secs),
            },
            store,
            publisher,
            clock,
            config,
            shared: Arc::clone(&shared),
        };
        worker.sync_counters()?;
        shared.startup_time.store(startup_time, Ordering::SeqCst);
        shared.claimed.store(worker.state.remote_node_id.is_some(), Ordering::SeqCst);
        shared.set_phase(WorkerPhase::Running);

        let thread_name = format!("cloudlink-{}", node_id.table_suffix());
        let thread = thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run(&receiver))
            .map_err(|err| SyncError::Thread(err.to_string()))?;

        Ok(WorkerHandle {
            node_id,
            queue,
            shared,
            thread: Mutex::new(Some(thread)),
        })
    }

    // ------------------------------------------------------------------------
    // Loop
    // ------------------------------------------------------------------------

    /// Runs the dequeue loop until a terminal command or queue disconnect.
    fn run(mut self, receiver: &CommandReceiver) {
        info!(
            node_id = %self.state.node_id,
            hostname = %self.state.descriptor.hostname,
            chart_sequence_id = %self.state.chart_sequence_id,
            alert_sequence_id = %self.state.alert_sequence_id,
            "node worker started"
        );
        while let Some(queued) = receiver.dequeue() {
            let terminal = queued.command.is_terminal();
            self.process(queued);
            if terminal {
                self.drain(receiver);
                break;
            }
        }
        self.shared.set_phase(WorkerPhase::Stopped);
        info!(node_id = %self.state.node_id, "node worker stopped");
    }

    /// Executes one command and fires its completion.
    fn process(&mut self, queued: QueuedCommand) {
        let QueuedCommand {
            ticket,
            enqueued_at,
            command,
            completer,
        } = queued;
        let opcode = command.opcode();
        debug!(
            node_id = %self.state.node_id,
            opcode = %opcode,
            ticket,
            queued_ms = u64::try_from(enqueued_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "executing command"
        );
        let outcome = match self.execute(command) {
            Ok(()) => CommandOutcome::Completed,
            Err(err) => {
                self.shared.errors.fetch_add(1, Ordering::SeqCst);
                warn!(
                    node_id = %self.state.node_id,
                    opcode = %opcode,
                    ticket,
                    error = %err,
                    "command failed"
                );
                CommandOutcome::Failed(err.to_string())
            }
        };
        self.shared.processed.fetch_add(1, Ordering::SeqCst);
        if let Some(completer) = completer {
            completer.complete(outcome);
        }
    }

    /// Cancels queued non-critical commands and runs critical ones.
    fn drain(&mut self, receiver: &CommandReceiver) {
        self.shared.set_phase(WorkerPhase::Draining);
        let mut cancelled = 0_u64;
        while let Some(queued) = receiver.try_dequeue() {
            if queued.command.is_critical() {
                self.process(queued);
                continue;
            }
            cancelled += 1;
            self.shared.cancelled.fetch_add(1, Ordering::SeqCst);
            if let Some(completer) = queued.completer {
                completer.complete(CommandOutcome::Cancelled);
            }
        }
        if cancelled > 0 {
            info!(node_id = %self.state.node_id, cancelled, "cancelled queued commands on drain");
        }
    }

    /// Dispatches a command to its handler.
    fn execute(&mut self, command: Command) -> Result<(), SyncError> {
        match command {
            Command::Noop => Ok(()),
            Command::AddAlert(request) => self.stage(EntityType::Alert, &request),
            Command::AddChart(request) => self.stage(EntityType::Chart, &request),
            Command::AddDimension(request) => self.stage(EntityType::Dimension, &request),
            Command::AlarmHealthLog => self.publish_alert_health(),
            Command::ChartAck(target) => self.ack_charts(target),
            Command::Check => self.check_tables(),
            Command::CheckRotation => self.check_rotation(),
            Command::Cleanup => self.cleanup(),
            Command::DedupChart => self.dedup_charts(),
            Command::DeleteHost => self.delete_host(),
            Command::NodeInfo(update) => self.node_info(update),
            Command::PushAlert {
                start_from,
            } => self.push_alerts(start_from),
            Command::PushAlertConfig {
                config_hash,
                payload,
            } => self.push_config(Opcode::PushAlertConfig, config_hash, payload),
            Command::PushChart => self.push_charts(),
            Command::PushChartConfig {
                config_hash,
                payload,
            } => self.push_config(Opcode::PushChartConfig, config_hash, payload),
            Command::ResetChart {
                start_from,
            } => self.reset_chart(start_from),
            Command::ResetNode => self.reset_node(),
            Command::Shutdown => {
                info!(node_id = %self.state.node_id, "shutdown requested");
                Ok(())
            }
            Command::StatusChart => self.publish_chart_status(),
            Command::SyncChartSeq => self.sync_counters(),
            Command::Timer => self.timer(),
            Command::UpdStats => self.update_stats(),
        }
    }

    // ------------------------------------------------------------------------
    // Staging
    // ------------------------------------------------------------------------

    /// Stages one entity version and advances the stream counter.
    fn stage(&mut self, entity_type: EntityType, request: &StageRequest) -> Result<(), SyncError> {
        let now = self.clock.now_unix_secs();
        let outcome = self.store.stage(&self.state.node_id, entity_type, request, now)?;
        match entity_type.stream() {
            Stream::Charts => {
                self.state.chart_sequence_id = self.state.chart_sequence_id.max(outcome.sequence_id);
                self.shared.chart_updates.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .chart_sequence_id
                    .store(self.state.chart_sequence_id.get(), Ordering::SeqCst);
            }
            Stream::Alerts => {
                self.state.alert_sequence_id = self.state.alert_sequence_id.max(outcome.sequence_id);
                self.shared.alert_updates.fetch_add(1, Ordering::SeqCst);
                self.shared
                    .alert_sequence_id
                    .store(self.state.alert_sequence_id.get(), Ordering::SeqCst);
            }
        }
        debug!(
            node_id = %self.state.node_id,
            entity_id = %request.entity_id,
            entity_type = entity_type.as_str(),
            sequence_id = %outcome.sequence_id,
            update_count = outcome.update_count,
            deduplicated = outcome.deduplicated,
            "staged entity"
        );
        Ok(())
    }

    /// Applies a chart stream acknowledgement.
    fn ack_charts(&self, target: AckTarget) -> Result<(), SyncError> {
        let now = self.clock.now_unix_secs();
        let report = self.store.ack(&self.state.node_id, Stream::Charts, target, now)?;
        debug!(node_id = %self.state.node_id, acked = report.acked, "chart ack applied");
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Submission
    // ------------------------------------------------------------------------

    /// Returns the remote node id, logging the skip when unclaimed.
    fn claimed(&self, opcode: Opcode) -> Option<RemoteNodeId> {
        if self.state.remote_node_id.is_none() {
            debug!(node_id = %self.state.node_id, opcode = %opcode, "node not claimed; skipping");
        }
        self.state.remote_node_id
    }

    /// Opens and publishes the next chart batch.
    fn push_charts(&mut self) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(Opcode::PushChart) else {
            return Ok(());
        };
        let now = self.clock.now_unix_secs();
        let outcome = self.store.start_batch(
            &self.state.node_id,
            Stream::Charts,
            self.config.batch_limits,
            now,
        )?;
        self.publish_outcome(Stream::Charts, remote, outcome)
    }

    /// Opens and publishes the next alert batch, honoring a resume request.
    fn push_alerts(&mut self, start_from: Option<SequenceId>) -> Result<(), SyncError> {
        let now = self.clock.now_unix_secs();
        if let Some(start) = start_from {
            if start.get() > 1 {
                let below = SequenceId::new(start.get() - 1);
                let report = self.store.ack(
                    &self.state.node_id,
                    Stream::Alerts,
                    AckTarget::UpTo {
                        sequence_id: below,
                    },
                    now,
                )?;
                debug!(
                    node_id = %self.state.node_id,
                    acked = report.acked,
                    up_to = %below,
                    "alerts acknowledged by resume request"
                );
            }
            self.state.alerts_start_seq_id = Some(start);
        }
        let Some(remote) = self.claimed(Opcode::PushAlert) else {
            return Ok(());
        };
        let outcome = match self.state.alerts_start_seq_id.take() {
            Some(start) => {
                info!(node_id = %self.state.node_id, start_from = %start, "resuming alert stream");
                self.store.resume_from(&self.state.node_id, Stream::Alerts, start, now)?
            }
            None => self.store.start_batch(
                &self.state.node_id,
                Stream::Alerts,
                self.config.batch_limits,
                now,
            )?,
        };
        self.publish_outcome(Stream::Alerts, remote, outcome)
    }

    /// Replays the chart stream from `start_from`.
    fn reset_chart(&mut self, start_from: SequenceId) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(Opcode::ResetChart) else {
            return Ok(());
        };
        self.publisher.publish(OutboundMessage::ChartReset {
            node_id: self.state.node_id,
            remote_node_id: remote,
            start_from,
        })?;
        let now = self.clock.now_unix_secs();
        let outcome =
            self.store.resume_from(&self.state.node_id, Stream::Charts, start_from, now)?;
        info!(node_id = %self.state.node_id, start_from = %start_from, "chart stream reset");
        self.publish_outcome(Stream::Charts, remote, outcome)
    }

    /// Records batch counters and publishes a started batch.
    fn publish_outcome(
        &mut self,
        stream: Stream,
        remote: RemoteNodeId,
        outcome: BatchOutcome,
    ) -> Result<(), SyncError> {
        match outcome {
            BatchOutcome::Idle => Ok(()),
            BatchOutcome::Blocked {
                open_batch,
            } => {
                debug!(
                    node_id = %self.state.node_id,
                    stream = %stream,
                    open_batch = %open_batch,
                    "previous batch awaiting ack"
                );
                Ok(())
            }
            BatchOutcome::Started(batch) => {
                match stream {
                    Stream::Charts => {
                        self.state.batch_id = batch.batch_id;
                        self.shared.batch_id.store(batch.batch_id.get(), Ordering::SeqCst);
                    }
                    Stream::Alerts => {
                        self.state.alerts_batch_id = batch.batch_id;
                        self.shared.alerts_batch_id.store(batch.batch_id.get(), Ordering::SeqCst);
                    }
                }
                self.publish_batch(remote, batch)
            }
        }
    }

    /// Publishes a batch in chunks; abandons it when the transport fails.
    fn publish_batch(&self, remote: RemoteNodeId, batch: SubmissionBatch) -> Result<(), SyncError> {
        let SubmissionBatch {
            stream,
            batch_id,
            records,
        } = batch;
        let total = records.len();
        let chunk_size = self.config.batch_limits.max_batch_size.max(1);
        let chunks = total.div_ceil(chunk_size);
        for (index, chunk) in records.chunks(chunk_size).enumerate() {
            let message = BatchMessage {
                node_id: self.state.node_id,
                remote_node_id: remote,
                batch_id,
                chunk: index,
                chunks,
                records: chunk.to_vec(),
            };
            let message = match stream {
                Stream::Charts => OutboundMessage::ChartBatch(message),
                Stream::Alerts => OutboundMessage::AlertBatch(message),
            };
            if let Err(err) = self.publisher.publish(message) {
                self.store.abandon_batch(&self.state.node_id, stream)?;
                warn!(
                    node_id = %self.state.node_id,
                    stream = %stream,
                    batch_id = %batch_id,
                    error = %err,
                    "publish failed; batch abandoned"
                );
                return Err(err.into());
            }
        }
        debug!(
            node_id = %self.state.node_id,
            stream = %stream,
            batch_id = %batch_id,
            records = total,
            chunks,
            "batch published"
        );
        Ok(())
    }

    /// Publishes a configuration payload requested by the collector.
    fn push_config(
        &self,
        opcode: Opcode,
        config_hash: String,
        payload: Vec<u8>,
    ) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(opcode) else {
            return Ok(());
        };
        let node_id = self.state.node_id;
        let message = if opcode == Opcode::PushAlertConfig {
            OutboundMessage::AlertConfig {
                node_id,
                remote_node_id: remote,
                config_hash,
                payload,
            }
        } else {
            OutboundMessage::ChartConfig {
                node_id,
                remote_node_id: remote,
                config_hash,
                payload,
            }
        };
        self.publisher.publish(message)?;
        Ok(())
    }

    /// Publishes the chart stream summary.
    fn publish_chart_status(&self) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(Opcode::StatusChart) else {
            return Ok(());
        };
        let status = self.store.status(&self.state.node_id, Stream::Charts)?;
        self.publisher.publish(OutboundMessage::StreamStatus {
            node_id: self.state.node_id,
            remote_node_id: remote,
            status,
        })?;
        Ok(())
    }

    /// Publishes the alert stream health summary.
    fn publish_alert_health(&self) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(Opcode::AlarmHealthLog) else {
            return Ok(());
        };
        let status = self.store.status(&self.state.node_id, Stream::Alerts)?;
        self.publisher.publish(OutboundMessage::AlertHealthLog {
            node_id: self.state.node_id,
            remote_node_id: remote,
            status,
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Node State
    // ------------------------------------------------------------------------

    /// Records claim state and metadata, then publishes node info.
    fn node_info(&mut self, update: NodeInfoUpdate) -> Result<(), SyncError> {
        if let Some(remote) = update.remote_node_id {
            if self.state.remote_node_id != Some(remote) {
                info!(node_id = %self.state.node_id, remote_node_id = %remote, "node claimed");
            }
            self.state.remote_node_id = Some(remote);
            self.shared.claimed.store(true, Ordering::SeqCst);
        }
        if let Some(descriptor) = update.descriptor {
            self.state.descriptor = descriptor;
        }
        self.publish_node_info(Opcode::NodeInfo)
    }

    /// Publishes node info when claimed.
    fn publish_node_info(&self, opcode: Opcode) -> Result<(), SyncError> {
        let Some(remote) = self.claimed(opcode) else {
            return Ok(());
        };
        self.publisher.publish(OutboundMessage::NodeInfo {
            node_id: self.state.node_id,
            remote_node_id: remote,
            descriptor: self.state.descriptor.clone(),
        })?;
        Ok(())
    }

    /// Abandons open batches on both streams and republishes node info.
    fn reset_node(&self) -> Result<(), SyncError> {
        for stream in Stream::ALL {
            if let Some(batch_id) = self.store.abandon_batch(&self.state.node_id, stream)? {
                info!(
                    node_id = %self.state.node_id,
                    stream = %stream,
                    batch_id = %batch_id,
                    "open batch abandoned by node reset"
                );
            }
        }
        self.publish_node_info(Opcode::ResetNode)
    }

    /// Drops the node's tables.
    fn delete_host(&self) -> Result<(), SyncError> {
        self.store.drop_node(&self.state.node_id)?;
        info!(node_id = %self.state.node_id, "node staging tables dropped");
        Ok(())
    }

    /// Recovers sequence and batch counters from the store.
    fn sync_counters(&mut self) -> Result<(), SyncError> {
        let charts = self.store.cursor(&self.state.node_id, Stream::Charts)?;
        let alerts = self.store.cursor(&self.state.node_id, Stream::Alerts)?;
        self.state.chart_sequence_id = charts.last_sequence_id;
        self.state.batch_id = charts.last_batch_id;
        self.state.alert_sequence_id = alerts.last_sequence_id;
        self.state.alerts_batch_id = alerts.last_batch_id;
        let shared = &self.shared;
        shared.chart_sequence_id.store(charts.last_sequence_id.get(), Ordering::SeqCst);
        shared.batch_id.store(charts.last_batch_id.get(), Ordering::SeqCst);
        shared.alert_sequence_id.store(alerts.last_sequence_id.get(), Ordering::SeqCst);
        shared.alerts_batch_id.store(alerts.last_batch_id.get(), Ordering::SeqCst);
        Ok(())
    }

    /// Refreshes observable per-stream counters.
    fn update_stats(&self) -> Result<(), SyncError> {
        let charts = self.store.status(&self.state.node_id, Stream::Charts)?;
        let alerts = self.store.status(&self.state.node_id, Stream::Alerts)?;
        self.shared.chart_pending.store(charts.pending, Ordering::SeqCst);
        self.shared.alert_pending.store(alerts.pending, Ordering::SeqCst);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Maintenance
    // ------------------------------------------------------------------------

    /// Recreates missing node tables.
    fn check_tables(&self) -> Result<(), SyncError> {
        if !self.store.node_exists(&self.state.node_id)? {
            warn!(node_id = %self.state.node_id, "staging tables missing; recreating");
            self.store.ensure_node(&self.state.node_id)?;
        }
        Ok(())
    }

    /// Bounds retained acknowledged rows per stream.
    fn check_rotation(&self) -> Result<(), SyncError> {
        for stream in Stream::ALL {
            let removed = self.store.enforce_ack_limit(
                &self.state.node_id,
                stream,
                self.config.max_acked_rows,
            )?;
            if removed > 0 {
                debug!(node_id = %self.state.node_id, stream = %stream, removed, "rotated acked rows");
            }
        }
        Ok(())
    }

    /// Removes superseded chart rows.
    fn dedup_charts(&self) -> Result<(), SyncError> {
        let removed = self.store.dedup(&self.state.node_id, Stream::Charts)?;
        debug!(node_id = %self.state.node_id, removed, "chart dedup pass");
        Ok(())
    }

    /// Prunes both streams and schedules the next cleanup.
    fn cleanup(&mut self) -> Result<(), SyncError> {
        let now = self.clock.now_unix_secs();
        let cutoff = now.saturating_sub(self.config.ack_retention_secs);
        for stream in Stream::ALL {
            let report = self.store.prune(&self.state.node_id, stream, cutoff)?;
            debug!(
                node_id = %self.state.node_id,
                stream = %stream,
                expired_acks = report.expired_acks,
                superseded = report.superseded,
                orphan_payloads = report.orphan_payloads,
                "cleanup pass"
            );
        }
        self.state.cleanup_after = now.saturating_add(self.config.cleanup_interval_secs);
        Ok(())
    }

    /// Abandons open batches older than the configured lifetime.
    fn expire_batches(&self, now: u64) -> Result<(), SyncError> {
        for stream in Stream::ALL {
            let status = self.store.status(&self.state.node_id, stream)?;
            let (Some(open_batch), Some(created)) = (status.open_batch_id, status.batch_created)
            else {
                continue;
            };
            if now.saturating_sub(created) >= self.config.batch_lifetime_secs {
                self.store.abandon_batch(&self.state.node_id, stream)?;
                warn!(
                    node_id = %self.state.node_id,
                    stream = %stream,
                    batch_id = %open_batch,
                    "batch expired without ack; rows will be resent"
                );
            }
        }
        Ok(())
    }

    /// Runs cleanup when it is due.
    fn cleanup_if_due(&mut self, now: u64) -> Result<(), SyncError> {
        if now < self.state.cleanup_after {
            return Ok(());
        }
        self.cleanup()
    }

    /// Periodic tick: batch aging, pushes, cleanup and rotation.
    ///
    /// Every step runs even when an earlier one fails; the first failure is
    /// returned.
    fn timer(&mut self) -> Result<(), SyncError> {
        let now = self.clock.now_unix_secs();
        let results = [
            self.expire_batches(now),
            self.push_charts(),
            self.push_alerts(None),
            self.cleanup_if_due(now),
            self.check_rotation(),
            self.update_stats(),
        ];
        let mut first_error = None;
        for result in results {
            if let Err(err) = result {
                if first_error.is_none() {
                    first_error = Some(err);
                } else {
                    warn!(node_id = %self.state.node_id, error = %err, "timer step failed");
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
