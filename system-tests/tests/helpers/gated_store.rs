// system-tests/tests/helpers/gated_store.rs
// ============================================================================
// Module: Gated Store
// Description: StagingStore wrapper that can hold node table setup.
// Purpose: Keep a worker in its startup phase while tests probe the registry.
// Dependencies: cloudlink-core, cloudlink-store-sqlite
// ============================================================================

use std::sync::Arc;
use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use cloudlink_core::AckReport;
use cloudlink_core::AckTarget;
use cloudlink_core::BatchId;
use cloudlink_core::BatchLimits;
use cloudlink_core::BatchOutcome;
use cloudlink_core::EntityType;
use cloudlink_core::NodeId;
use cloudlink_core::PruneReport;
use cloudlink_core::SequenceId;
use cloudlink_core::StageOutcome;
use cloudlink_core::StageRequest;
use cloudlink_core::StagedRecord;
use cloudlink_core::StagingStore;
use cloudlink_core::StoreError;
use cloudlink_core::Stream;
use cloudlink_core::StreamCursor;
use cloudlink_core::StreamStatus;
use cloudlink_store_sqlite::SqliteStagingStore;

/// Delegates to SQLite; `ensure_node` waits while the gate is closed.
pub struct GatedStore {
    inner: Arc<SqliteStagingStore>,
    closed: Mutex<bool>,
    opened: Condvar,
    entered: AtomicUsize,
}

impl GatedStore {
    /// Wraps `inner` with the gate open.
    pub fn new(inner: Arc<SqliteStagingStore>) -> Self {
        Self {
            inner,
            closed: Mutex::new(false),
            opened: Condvar::new(),
            entered: AtomicUsize::new(0),
        }
    }

    /// Holds every following `ensure_node` call.
    pub fn close(&self) {
        *self.closed.lock().unwrap() = true;
    }

    /// Releases held calls.
    pub fn open(&self) {
        *self.closed.lock().unwrap() = false;
        self.opened.notify_all();
    }

    /// Number of `ensure_node` calls that hit a closed gate.
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

impl StagingStore for GatedStore {
    fn ensure_node(&self, node: &NodeId) -> Result<(), StoreError> {
        {
            let mut closed = self.closed.lock().unwrap();
            if *closed {
                self.entered.fetch_add(1, Ordering::SeqCst);
                while *closed {
                    closed = self.opened.wait(closed).unwrap();
                }
            }
        }
        self.inner.ensure_node(node)
    }

    fn node_exists(&self, node: &NodeId) -> Result<bool, StoreError> {
        self.inner.node_exists(node)
    }

    fn drop_node(&self, node: &NodeId) -> Result<(), StoreError> {
        self.inner.drop_node(node)
    }

    fn stage(
        &self,
        node: &NodeId,
        entity_type: EntityType,
        request: &StageRequest,
        now: u64,
    ) -> Result<StageOutcome, StoreError> {
        self.inner.stage(node, entity_type, request, now)
    }

    fn start_batch(
        &self,
        node: &NodeId,
        stream: Stream,
        limits: BatchLimits,
        now: u64,
    ) -> Result<BatchOutcome, StoreError> {
        self.inner.start_batch(node, stream, limits, now)
    }

    fn ack(
        &self,
        node: &NodeId,
        stream: Stream,
        target: AckTarget,
        now: u64,
    ) -> Result<AckReport, StoreError> {
        self.inner.ack(node, stream, target, now)
    }

    fn abandon_batch(&self, node: &NodeId, stream: Stream) -> Result<Option<BatchId>, StoreError> {
        self.inner.abandon_batch(node, stream)
    }

    fn prune(
        &self,
        node: &NodeId,
        stream: Stream,
        ack_cutoff: u64,
    ) -> Result<PruneReport, StoreError> {
        self.inner.prune(node, stream, ack_cutoff)
    }

    fn dedup(&self, node: &NodeId, stream: Stream) -> Result<usize, StoreError> {
        self.inner.dedup(node, stream)
    }

    fn enforce_ack_limit(
        &self,
        node: &NodeId,
        stream: Stream,
        max_rows: usize,
    ) -> Result<usize, StoreError> {
        self.inner.enforce_ack_limit(node, stream, max_rows)
    }

    fn resume_from(
        &self,
        node: &NodeId,
        stream: Stream,
        start: SequenceId,
        now: u64,
    ) -> Result<BatchOutcome, StoreError> {
        self.inner.resume_from(node, stream, start, now)
    }

    fn cursor(&self, node: &NodeId, stream: Stream) -> Result<StreamCursor, StoreError> {
        self.inner.cursor(node, stream)
    }

    fn status(&self, node: &NodeId, stream: Stream) -> Result<StreamStatus, StoreError> {
        self.inner.status(node, stream)
    }

    fn records(&self, node: &NodeId, stream: Stream) -> Result<Vec<StagedRecord>, StoreError> {
        self.inner.records(node, stream)
    }
}
