// system-tests/tests/suites/routing.rs
// ============================================================================
// Module: Remote Routing Tests
// Description: Collector requests routed by remote node id.
// Purpose: Validate identity resolution, alert resume and chart replay.
// Dependencies: system-tests helpers
// ============================================================================

//! ## Overview
//! Collector requests carry the remote node id as text. These tests check
//! that malformed or unknown ids are rejected and that resume and replay
//! requests reach the right worker with the expected stream effects.

use cloudlink_core::AckTarget;
use cloudlink_core::BatchId;
use cloudlink_core::Command;
use cloudlink_core::EntityId;
use cloudlink_core::NodeId;
use cloudlink_core::OutboundMessage;
use cloudlink_core::RecordStatus;
use cloudlink_core::RemoteNodeId;
use cloudlink_core::SequenceId;
use cloudlink_core::Stream;
use cloudlink_core::SyncError;

use crate::helpers::harness::Harness;

// ============================================================================
// SECTION: Resolution
// ============================================================================

#[test]
fn malformed_or_unknown_remote_ids_are_rejected() {
    let harness = Harness::new("malformed_or_unknown_remote_ids_are_rejected");
    let (node_id, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    let unknown = RemoteNodeId::new(*NodeId::random().as_uuid()).to_string();

    for remote in [None, Some(""), Some("not-a-uuid"), Some(unknown.as_str())] {
        assert!(matches!(
            harness.registry.request_chart_reset(remote, SequenceId::new(1)),
            Err(SyncError::NotFound(_))
        ));
        assert!(matches!(
            harness.registry.request_alert_resume(remote, SequenceId::new(1)),
            Err(SyncError::NotFound(_))
        ));
    }
    harness.settle(&node_id);
    assert!(harness.publisher.messages().is_empty());
}

#[test]
fn requests_reach_only_the_claimed_node() {
    let harness = Harness::new("requests_reach_only_the_claimed_node");
    let (first, first_remote) = harness.claimed_node();
    let (second, _) = harness.claimed_node();
    harness.stage(&first, Command::AddChart, EntityId::random());
    harness.stage(&second, Command::AddChart, EntityId::random());

    harness
        .registry
        .request_chart_reset(Some(&first_remote.to_string()), SequenceId::new(1))
        .unwrap();
    harness.settle(&first);
    harness.settle(&second);

    let batches = harness.publisher.chart_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].node_id, first);
    assert_eq!(harness.status(&second, Stream::Charts).pending, 1);
}

// ============================================================================
// SECTION: Alert Resume
// ============================================================================

#[test]
fn alert_resume_acks_earlier_rows_and_resends_from_start() {
    let harness = Harness::new("alert_resume_acks_earlier_rows_and_resends_from_start");
    let (node_id, remote) = harness.claimed_node();
    for _ in 0 .. 3 {
        harness.stage(&node_id, Command::AddAlert, EntityId::random());
    }
    harness.tick(&node_id);
    assert_eq!(harness.publisher.alert_batches().len(), 1);

    harness.registry.request_alert_resume(Some(&remote.to_string()), SequenceId::new(3)).unwrap();
    harness.settle(&node_id);

    let alerts = harness.publisher.alert_batches();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[1].batch_id, BatchId::new(2));
    let resent: Vec<u64> = alerts[1].records.iter().map(|record| record.sequence_id.get()).collect();
    assert_eq!(resent, vec![3]);

    let statuses: Vec<(u64, RecordStatus)> = harness
        .records(&node_id, Stream::Alerts)
        .iter()
        .map(|record| (record.sequence_id.get(), record.status))
        .collect();
    assert_eq!(
        statuses,
        vec![(1, RecordStatus::Ack), (2, RecordStatus::Ack), (3, RecordStatus::Sent)]
    );
}

#[test]
fn alert_resume_on_unclaimed_node_is_applied_after_claim() {
    let harness = Harness::new("alert_resume_on_unclaimed_node_is_applied_after_claim");
    let node_id = NodeId::random();
    harness.add_node(node_id, None);
    for _ in 0 .. 2 {
        harness.stage(&node_id, Command::AddAlert, EntityId::random());
    }
    let resume = Command::PushAlert {
        start_from: Some(SequenceId::new(2)),
    };
    harness.run(&node_id, resume);
    assert!(harness.publisher.alert_batches().is_empty());

    let remote = RemoteNodeId::new(*NodeId::random().as_uuid());
    harness.registry.claim(&node_id, remote, None).unwrap();
    harness.run(
        &node_id,
        Command::PushAlert {
            start_from: None,
        },
    );

    let alerts = harness.publisher.alert_batches();
    assert_eq!(alerts.len(), 1);
    let resent: Vec<u64> = alerts[0].records.iter().map(|record| record.sequence_id.get()).collect();
    assert_eq!(resent, vec![2]);
}

// ============================================================================
// SECTION: Chart Replay
// ============================================================================

#[test]
fn chart_reset_announces_and_replays_from_sequence() {
    let harness = Harness::new("chart_reset_announces_and_replays_from_sequence");
    let (node_id, remote) = harness.claimed_node();
    for _ in 0 .. 3 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }
    harness.tick(&node_id);
    harness
        .registry
        .deliver_chart_ack(
            Some(&remote.to_string()),
            AckTarget::Batch {
                batch_id: BatchId::new(1),
            },
        )
        .unwrap();

    harness.registry.request_chart_reset(Some(&remote.to_string()), SequenceId::new(2)).unwrap();
    harness.settle(&node_id);

    let messages = harness.publisher.messages();
    let reset_at = messages
        .iter()
        .position(|message| matches!(message, OutboundMessage::ChartReset { .. }))
        .unwrap();
    match &messages[reset_at] {
        OutboundMessage::ChartReset {
            start_from,
            remote_node_id,
            ..
        } => {
            assert_eq!(*start_from, SequenceId::new(2));
            assert_eq!(*remote_node_id, remote);
        }
        other => panic!("unexpected message {other:?}"),
    }
    match &messages[reset_at + 1] {
        OutboundMessage::ChartBatch(batch) => {
            let replayed: Vec<u64> =
                batch.records.iter().map(|record| record.sequence_id.get()).collect();
            assert_eq!(replayed, vec![2, 3]);
            assert_eq!(batch.batch_id, BatchId::new(2));
        }
        other => panic!("expected replayed batch, got {other:?}"),
    }
    assert_eq!(harness.status(&node_id, Stream::Charts).open_batch_id, None);
}
