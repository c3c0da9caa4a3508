// system-tests/tests/helpers/harness.rs
// ============================================================================
// Module: Node Harness
// Description: Registry wired to an on-disk store, a recording publisher and
// a manual clock.
// Purpose: Drive real node workers deterministically from system tests.
// Dependencies: system-tests, cloudlink-core, cloudlink-store-sqlite, tempfile
// ============================================================================

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use std::time::Instant;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use cloudlink_core::Clock;
use cloudlink_core::Command;
use cloudlink_core::CommandOutcome;
use cloudlink_core::EntityId;
use cloudlink_core::ManualClock;
use cloudlink_core::NodeDescriptor;
use cloudlink_core::NodeId;
use cloudlink_core::NodeIdentity;
use cloudlink_core::NodeRegistry;
use cloudlink_core::PublishChannel;
use cloudlink_core::RemoteNodeId;
use cloudlink_core::StageRequest;
use cloudlink_core::StagedRecord;
use cloudlink_core::StagingStore;
use cloudlink_core::Stream;
use cloudlink_core::StreamStatus;
use cloudlink_core::WorkerConfig;
use cloudlink_store_sqlite::SqliteStagingStore;
use cloudlink_store_sqlite::SqliteStoreConfig;
use system_tests::config::SystemTestConfig;
use tempfile::TempDir;

use super::publisher::RecordingPublisher;

/// Manual clock start (unix seconds).
pub const START_TIME: u64 = 1_700_000_000;

/// Live registry plus the collaborators tests inspect.
pub struct Harness {
    pub registry: NodeRegistry,
    pub store: Arc<SqliteStagingStore>,
    pub publisher: Arc<RecordingPublisher>,
    pub clock: Arc<ManualClock>,
    pub worker_config: WorkerConfig,
    pub timeout: Duration,
    db_path: PathBuf,
    _dir: Option<TempDir>,
}

impl Harness {
    /// Creates a harness with default worker settings.
    pub fn new(test_name: &str) -> Self {
        Self::with_config(test_name, WorkerConfig::default())
    }

    /// Creates a harness with explicit worker settings.
    pub fn with_config(test_name: &str, worker_config: WorkerConfig) -> Self {
        let config = SystemTestConfig::load().unwrap();
        let (db_path, dir) = match &config.run_root {
            Some(root) => {
                let stamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
                (root.join(format!("{test_name}-{stamp}")).join("staging.db"), None)
            }
            None => {
                let dir = TempDir::new().unwrap();
                (dir.path().join("staging.db"), Some(dir))
            }
        };
        let store = Arc::new(SqliteStagingStore::new(&SqliteStoreConfig::at(&db_path)).unwrap());
        let publisher = Arc::new(RecordingPublisher::default());
        let clock = Arc::new(ManualClock::new(START_TIME));
        let registry = build_registry(&store, &publisher, &clock, worker_config);
        Self {
            registry,
            store,
            publisher,
            clock,
            worker_config,
            timeout: config.effective_timeout(),
            db_path,
            _dir: dir,
        }
    }

    /// Stops every worker and starts an empty registry over a reopened store.
    pub fn restart(&mut self) {
        self.registry.shutdown().unwrap();
        self.store = Arc::new(SqliteStagingStore::new(&SqliteStoreConfig::at(&self.db_path)).unwrap());
        self.registry = build_registry(&self.store, &self.publisher, &self.clock, self.worker_config);
    }

    /// Registers a node, claimed when `remote` is given.
    pub fn add_node(&self, node_id: NodeId, remote: Option<RemoteNodeId>) {
        self.registry
            .add_node(NodeIdentity {
                node_id,
                remote_node_id: remote,
                descriptor: NodeDescriptor {
                    hostname: format!("host-{}", node_id.table_suffix()),
                    os: "linux".to_string(),
                    agent_version: "1.0.0".to_string(),
                    ..NodeDescriptor::default()
                },
            })
            .unwrap();
    }

    /// Registers a fresh claimed node and returns its ids.
    pub fn claimed_node(&self) -> (NodeId, RemoteNodeId) {
        let node_id = NodeId::random();
        let remote = RemoteNodeId::new(*NodeId::random().as_uuid());
        self.add_node(node_id, Some(remote));
        (node_id, remote)
    }

    /// Stages an entity through the worker and waits for it.
    pub fn stage(&self, node_id: &NodeId, command: fn(StageRequest) -> Command, entity: EntityId) {
        let request = StageRequest {
            entity_id: entity,
            claim_id: None,
            payload: format!("payload-{entity}").into_bytes(),
        };
        let outcome = self.registry.submit_and_wait(node_id, command(request)).unwrap();
        assert_eq!(outcome, CommandOutcome::Completed);
    }

    /// Runs a command and waits for its outcome.
    pub fn run(&self, node_id: &NodeId, command: Command) -> CommandOutcome {
        self.registry.submit_and_wait(node_id, command).unwrap()
    }

    /// Waits until every command queued before this call has run.
    pub fn settle(&self, node_id: &NodeId) {
        assert_eq!(self.run(node_id, Command::Noop), CommandOutcome::Completed);
    }

    /// Ticks every worker and waits for the ticks to be processed.
    pub fn tick(&self, node_id: &NodeId) {
        assert!(self.registry.tick_all().unwrap() > 0);
        self.settle(node_id);
    }

    /// Returns the stream status straight from the store.
    pub fn status(&self, node_id: &NodeId, stream: Stream) -> StreamStatus {
        self.store.status(node_id, stream).unwrap()
    }

    /// Returns every staged row of a stream.
    pub fn records(&self, node_id: &NodeId, stream: Stream) -> Vec<StagedRecord> {
        self.store.records(node_id, stream).unwrap()
    }

    /// Builds a second registry over `store` sharing this harness's publisher
    /// and clock.
    pub fn registry_over(&self, store: Arc<dyn StagingStore>) -> NodeRegistry {
        NodeRegistry::new(
            store,
            Arc::clone(&self.publisher) as Arc<dyn PublishChannel>,
            Arc::clone(&self.clock) as Arc<dyn Clock>,
            self.worker_config,
        )
    }

    /// Polls `condition` until it holds or the harness timeout elapses.
    pub fn wait_until(&self, what: &str, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + self.timeout;
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for {what}");
            thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.publisher.release();
        let _ = self.registry.shutdown();
    }
}

fn build_registry(
    store: &Arc<SqliteStagingStore>,
    publisher: &Arc<RecordingPublisher>,
    clock: &Arc<ManualClock>,
    worker_config: WorkerConfig,
) -> NodeRegistry {
    NodeRegistry::new(
        Arc::clone(store) as Arc<dyn StagingStore>,
        Arc::clone(publisher) as Arc<dyn PublishChannel>,
        Arc::clone(clock) as Arc<dyn Clock>,
        worker_config,
    )
}
