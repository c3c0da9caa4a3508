// system-tests/tests/suites/lifecycle.rs
// ============================================================================
// Module: Worker Lifecycle Tests
// Description: Claiming, draining, deletion and restart of node workers.
// Purpose: Validate worker lifecycle end to end against a real store.
// Dependencies: system-tests helpers
// ============================================================================

//! ## Overview
//! Runs node workers over an on-disk staging store and checks claim handling,
//! FIFO ordering across producers, drain cancellation, node deletion and
//! counter recovery after a restart.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread;

use cloudlink_config::SyncConfig;
use cloudlink_config::config_toml_example;
use cloudlink_core::Command;
use cloudlink_core::CommandOutcome;
use cloudlink_core::EntityId;
use cloudlink_core::NodeDescriptor;
use cloudlink_core::NodeId;
use cloudlink_core::NodeIdentity;
use cloudlink_core::OutboundMessage;
use cloudlink_core::RecordStatus;
use cloudlink_core::RemoteNodeId;
use cloudlink_core::SequenceId;
use cloudlink_core::StageRequest;
use cloudlink_core::StagingStore;
use cloudlink_core::Stream;
use cloudlink_core::SubmitMode;
use cloudlink_core::SyncError;
use cloudlink_core::WorkerPhase;

use crate::helpers::gated_store::GatedStore;
use crate::helpers::harness::Harness;

// ============================================================================
// SECTION: Claiming
// ============================================================================

#[test]
fn unclaimed_node_stages_without_publishing() {
    let harness = Harness::new("unclaimed_node_stages_without_publishing");
    let node_id = NodeId::random();
    harness.add_node(node_id, None);
    assert_eq!(harness.registry.worker(&node_id).unwrap().phase(), WorkerPhase::Running);

    harness.stage(&node_id, Command::AddChart, EntityId::random());
    assert_eq!(harness.run(&node_id, Command::PushChart), CommandOutcome::Completed);
    assert_eq!(harness.run(&node_id, Command::StatusChart), CommandOutcome::Completed);
    harness.tick(&node_id);

    assert!(harness.publisher.messages().is_empty());
    assert_eq!(harness.status(&node_id, Stream::Charts).pending, 1);
    let stats = harness.registry.worker(&node_id).unwrap().stats();
    assert!(!stats.claimed);
    assert_eq!(stats.chart_sequence_id, SequenceId::new(1));
}

#[test]
fn claim_publishes_node_info_and_enables_pushes() {
    let harness = Harness::new("claim_publishes_node_info_and_enables_pushes");
    let node_id = NodeId::random();
    harness.add_node(node_id, None);
    harness.stage(&node_id, Command::AddChart, EntityId::random());

    let remote = RemoteNodeId::new(*NodeId::random().as_uuid());
    harness.registry.claim(&node_id, remote, None).unwrap();
    harness.tick(&node_id);

    let messages = harness.publisher.messages();
    match &messages[0] {
        OutboundMessage::NodeInfo {
            remote_node_id,
            descriptor,
            ..
        } => {
            assert_eq!(*remote_node_id, remote);
            assert_eq!(descriptor.os, "linux");
        }
        other => panic!("expected node info first, got {other:?}"),
    }
    assert_eq!(harness.publisher.chart_batches().len(), 1);
    assert!(harness.registry.worker(&node_id).unwrap().stats().claimed);
    assert_eq!(harness.registry.resolve_by_remote_id(Some(&remote.to_string())).unwrap(), node_id);
}

#[test]
fn duplicate_registration_is_rejected() {
    let harness = Harness::new("duplicate_registration_is_rejected");
    let (node_id, _) = harness.claimed_node();
    let duplicate = harness.registry.add_node(NodeIdentity {
        node_id,
        remote_node_id: None,
        descriptor: NodeDescriptor::default(),
    });
    assert!(matches!(duplicate, Err(SyncError::InvalidRequest(_))));
    assert_eq!(harness.registry.node_ids().unwrap(), vec![node_id]);
}

#[test]
fn registration_in_progress_does_not_block_routing() {
    let harness = Harness::new("registration_in_progress_does_not_block_routing");
    let gate = Arc::new(GatedStore::new(Arc::clone(&harness.store)));
    let registry = harness.registry_over(Arc::clone(&gate) as Arc<dyn StagingStore>);
    let first = NodeId::random();
    let remote = RemoteNodeId::new(*NodeId::random().as_uuid());
    registry.add_node(identity(first, Some(remote))).unwrap();

    gate.close();
    let second = NodeId::random();
    thread::scope(|scope| {
        let registry = &registry;
        let pending = scope.spawn(move || registry.add_node(identity(second, None)));
        harness.wait_until("table setup to block", || gate.entered() == 1);

        assert_eq!(registry.resolve_by_remote_id(Some(&remote.to_string())).unwrap(), first);
        assert_eq!(registry.node_ids().unwrap(), vec![first]);
        assert_eq!(registry.tick_all().unwrap(), 1);

        gate.open();
        pending.join().unwrap().unwrap();
    });

    let mut expected = vec![first, second];
    expected.sort();
    assert_eq!(registry.node_ids().unwrap(), expected);
    registry.shutdown().unwrap();
}

#[test]
fn concurrent_registration_of_one_node_keeps_a_single_worker() {
    let harness = Harness::new("concurrent_registration_of_one_node_keeps_a_single_worker");
    let gate = Arc::new(GatedStore::new(Arc::clone(&harness.store)));
    let registry = harness.registry_over(Arc::clone(&gate) as Arc<dyn StagingStore>);
    let node_id = NodeId::random();

    gate.close();
    let results: Vec<Result<(), SyncError>> = thread::scope(|scope| {
        let registry = &registry;
        let attempts: Vec<_> = (0 .. 2)
            .map(|_| scope.spawn(move || registry.add_node(identity(node_id, None))))
            .collect();
        harness.wait_until("both registrations to block", || gate.entered() == 2);
        gate.open();
        attempts.into_iter().map(|attempt| attempt.join().unwrap()).collect()
    });

    assert_eq!(results.iter().filter(|result| result.is_ok()).count(), 1);
    assert!(results.iter().any(|result| matches!(result, Err(SyncError::InvalidRequest(_)))));
    assert_eq!(registry.node_ids().unwrap(), vec![node_id]);
    let worker = registry.worker(&node_id).unwrap();
    assert_eq!(worker.phase(), WorkerPhase::Running);
    assert_eq!(worker.submit_and_wait(Command::Noop).unwrap(), CommandOutcome::Completed);
    registry.shutdown().unwrap();
}

/// Identity with an empty descriptor.
fn identity(node_id: NodeId, remote_node_id: Option<RemoteNodeId>) -> NodeIdentity {
    NodeIdentity {
        node_id,
        remote_node_id,
        descriptor: NodeDescriptor::default(),
    }
}

// ============================================================================
// SECTION: Ordering
// ============================================================================

#[test]
fn commands_from_each_producer_run_in_submission_order() {
    let harness = Harness::new("commands_from_each_producer_run_in_submission_order");
    let (node_id, _) = harness.claimed_node();
    let producers: Vec<Vec<EntityId>> =
        (0 .. 4).map(|_| (0 .. 25).map(|_| EntityId::random()).collect()).collect();

    thread::scope(|scope| {
        for entities in &producers {
            let registry = &harness.registry;
            scope.spawn(move || {
                for entity in entities {
                    let request = StageRequest {
                        entity_id: *entity,
                        claim_id: None,
                        payload: b"chart".to_vec(),
                    };
                    registry.submit(&node_id, Command::AddChart(request), SubmitMode::Blocking).unwrap();
                }
            });
        }
    });
    harness.settle(&node_id);

    let sequence_of: BTreeMap<EntityId, SequenceId> = harness
        .store
        .records(&node_id, Stream::Charts)
        .unwrap()
        .into_iter()
        .map(|record| (record.entity_id, record.sequence_id))
        .collect();
    assert_eq!(sequence_of.len(), 100);
    for entities in &producers {
        let sequences: Vec<SequenceId> = entities.iter().map(|entity| sequence_of[entity]).collect();
        assert!(sequences.windows(2).all(|pair| pair[0] < pair[1]), "{sequences:?}");
    }
    let stats = harness.registry.worker(&node_id).unwrap().stats();
    assert_eq!(stats.chart_updates, 100);
    assert_eq!(stats.chart_sequence_id, SequenceId::new(100));
}

// ============================================================================
// SECTION: Draining
// ============================================================================

#[test]
fn shutdown_cancels_later_work_but_runs_critical_commands() {
    let harness = Harness::new("shutdown_cancels_later_work_but_runs_critical_commands");
    let (node_id, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    let worker = harness.registry.worker(&node_id).unwrap();

    harness.publisher.hold();
    worker.submit(Command::PushChart, SubmitMode::Blocking).unwrap();
    harness.wait_until("publish to block", || harness.publisher.waiting() == 1);

    let before = worker.submit_tracked(Command::UpdStats, SubmitMode::Blocking).unwrap();
    worker.submit(Command::Shutdown, SubmitMode::Blocking).unwrap();
    let after: Vec<_> = [Command::Noop, Command::StatusChart, Command::UpdStats]
        .into_iter()
        .map(|command| worker.submit_tracked(command, SubmitMode::Blocking).unwrap())
        .collect();
    let delete = worker.submit_tracked(Command::DeleteHost, SubmitMode::Blocking).unwrap();
    assert!(before.ticket < after[0].ticket && after[0].ticket < delete.ticket);
    assert_eq!(worker.phase(), WorkerPhase::Running);

    harness.publisher.release();
    assert_eq!(before.completion.wait(), CommandOutcome::Completed);
    for submission in after {
        assert_eq!(submission.completion.wait(), CommandOutcome::Cancelled);
    }
    assert_eq!(delete.completion.wait(), CommandOutcome::Completed);
    worker.join().unwrap();

    assert_eq!(worker.phase(), WorkerPhase::Stopped);
    assert_eq!(worker.stats().cancelled, 3);
    assert!(!harness.store.node_exists(&node_id).unwrap());
    assert!(matches!(
        worker.submit(Command::Noop, SubmitMode::NonBlocking),
        Err(SyncError::WorkerStopped)
    ));
}

#[test]
fn registry_shutdown_stops_every_worker() {
    let harness = Harness::new("registry_shutdown_stops_every_worker");
    let (first, _) = harness.claimed_node();
    let (second, _) = harness.claimed_node();
    let workers =
        [harness.registry.worker(&first).unwrap(), harness.registry.worker(&second).unwrap()];

    harness.registry.shutdown().unwrap();

    assert!(harness.registry.node_ids().unwrap().is_empty());
    for worker in workers {
        assert_eq!(worker.phase(), WorkerPhase::Stopped);
    }
    assert!(harness.store.node_exists(&first).unwrap());
    assert!(matches!(harness.registry.tick_all(), Ok(0)));
}

// ============================================================================
// SECTION: Deletion
// ============================================================================

#[test]
fn remove_node_drops_tables_and_forgets_node() {
    let harness = Harness::new("remove_node_drops_tables_and_forgets_node");
    let (node_id, remote) = harness.claimed_node();
    let (other, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddAlert, EntityId::random());

    assert_eq!(harness.registry.remove_node(&node_id).unwrap(), CommandOutcome::Completed);

    assert!(!harness.store.node_exists(&node_id).unwrap());
    assert!(harness.store.node_exists(&other).unwrap());
    assert_eq!(harness.registry.node_ids().unwrap(), vec![other]);
    assert!(matches!(harness.registry.worker(&node_id), Err(SyncError::NotFound(_))));
    assert!(matches!(
        harness.registry.resolve_by_remote_id(Some(&remote.to_string())),
        Err(SyncError::NotFound(_))
    ));
}

#[test]
fn check_recreates_missing_tables() {
    let harness = Harness::new("check_recreates_missing_tables");
    let (node_id, _) = harness.claimed_node();
    harness.store.drop_node(&node_id).unwrap();

    assert_eq!(harness.run(&node_id, Command::Check), CommandOutcome::Completed);

    assert!(harness.store.node_exists(&node_id).unwrap());
    harness.stage(&node_id, Command::AddChart, EntityId::random());
}

// ============================================================================
// SECTION: Recovery
// ============================================================================

#[test]
fn restart_recovers_counters_and_resends_unacked_rows() {
    let mut harness = Harness::new("restart_recovers_counters_and_resends_unacked_rows");
    let (node_id, remote) = harness.claimed_node();
    for _ in 0 .. 3 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }
    harness.tick(&node_id);
    assert_eq!(harness.publisher.chart_batches().len(), 1);

    harness.restart();
    harness.add_node(node_id, Some(remote));
    let stats = harness.registry.worker(&node_id).unwrap().stats();
    assert_eq!(stats.chart_sequence_id, SequenceId::new(3));
    assert_eq!(stats.batch_id.get(), 1);

    assert_eq!(harness.run(&node_id, Command::ResetNode), CommandOutcome::Completed);
    harness.tick(&node_id);
    let batches = harness.publisher.chart_batches();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[1].batch_id.get(), 2);
    let resent: Vec<u64> = batches[1].records.iter().map(|record| record.sequence_id.get()).collect();
    assert_eq!(resent, vec![1, 2, 3]);
    assert!(batches[1].records.iter().all(|record| record.status == RecordStatus::Sent));
}

#[test]
fn example_config_boots_configured_nodes() {
    let harness = Harness::new("example_config_boots_configured_nodes");
    let config = SyncConfig::from_toml(&config_toml_example()).unwrap();
    let identities = config.node_identities();
    for identity in identities.clone() {
        harness.registry.add_node(identity).unwrap();
    }

    let expected: Vec<NodeId> = identities.iter().map(|identity| identity.node_id).collect();
    assert_eq!(harness.registry.node_ids().unwrap(), expected);
    let stats = harness.registry.stats().unwrap();
    assert!(stats.iter().all(|stats| stats.phase == WorkerPhase::Running));
    assert!(stats.iter().all(|stats| !stats.claimed));
}
