// system-tests/tests/suites/streams.rs
// ============================================================================
// Module: Stream Delivery Tests
// Description: Batch publication, acknowledgement, expiry and housekeeping.
// Purpose: Validate at-least-once delivery of both streams end to end.
// Dependencies: system-tests helpers
// ============================================================================

//! ## Overview
//! Drives the periodic tick against claimed nodes and checks batch contents,
//! ack gating, resend after transport failure or batch expiry, cleanup of
//! expired acknowledgements and status publication.

use cloudlink_core::AckTarget;
use cloudlink_core::BatchId;
use cloudlink_core::BatchLimits;
use cloudlink_core::BatchMessage;
use cloudlink_core::Command;
use cloudlink_core::CommandOutcome;
use cloudlink_core::EntityId;
use cloudlink_core::NodeId;
use cloudlink_core::OutboundMessage;
use cloudlink_core::RecordStatus;
use cloudlink_core::SequenceId;
use cloudlink_core::StagedRecord;
use cloudlink_core::Stream;
use cloudlink_core::WorkerConfig;

use crate::helpers::harness::Harness;

/// Sequence ids carried by a batch chunk.
fn sequences(batch: &BatchMessage) -> Vec<u64> {
    batch.records.iter().map(|record| record.sequence_id.get()).collect()
}

// ============================================================================
// SECTION: Publication
// ============================================================================

#[test]
fn tick_publishes_both_streams_in_sequence_order() {
    let harness = Harness::new("tick_publishes_both_streams_in_sequence_order");
    let (node_id, remote) = harness.claimed_node();
    for _ in 0 .. 3 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }
    harness.stage(&node_id, Command::AddDimension, EntityId::random());
    harness.stage(&node_id, Command::AddAlert, EntityId::random());

    harness.tick(&node_id);

    let charts = harness.publisher.chart_batches();
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0].remote_node_id, remote);
    assert_eq!(charts[0].batch_id, BatchId::new(1));
    assert_eq!(sequences(&charts[0]), vec![1, 2, 3, 4]);
    let alerts = harness.publisher.alert_batches();
    assert_eq!(alerts.len(), 1);
    assert_eq!(sequences(&alerts[0]), vec![1]);

    let status = harness.status(&node_id, Stream::Charts);
    assert_eq!(status.sent, 4);
    assert_eq!(status.open_batch_id, Some(BatchId::new(1)));
    let stats = harness.registry.worker(&node_id).unwrap().stats();
    assert_eq!(stats.batch_id, BatchId::new(1));
    assert_eq!(stats.alerts_batch_id, BatchId::new(1));
    assert_eq!(stats.chart_pending, 0);
}

#[test]
fn large_batches_are_split_into_chunks() {
    let config = WorkerConfig {
        batch_limits: BatchLimits {
            max_batch_size: 2,
            max_batch_count: 2,
        },
        ..WorkerConfig::default()
    };
    let harness = Harness::with_config("large_batches_are_split_into_chunks", config);
    let (node_id, _) = harness.claimed_node();
    for _ in 0 .. 5 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }

    harness.tick(&node_id);

    let chunks = harness.publisher.chart_batches();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().all(|chunk| chunk.chunks == 2 && chunk.batch_id == BatchId::new(1)));
    assert_eq!(sequences(&chunks[0]), vec![1, 2]);
    assert_eq!(sequences(&chunks[1]), vec![3, 4]);
    assert_eq!(harness.status(&node_id, Stream::Charts).pending, 1);
}

#[test]
fn restaged_entity_is_sent_once() {
    let harness = Harness::new("restaged_entity_is_sent_once");
    let (node_id, _) = harness.claimed_node();
    let entity = EntityId::random();
    harness.stage(&node_id, Command::AddChart, entity);
    harness.stage(&node_id, Command::AddChart, entity);

    harness.tick(&node_id);

    let charts = harness.publisher.chart_batches();
    assert_eq!(charts[0].records.len(), 1);
    assert_eq!(charts[0].records[0].entity_id, entity);
    assert_eq!(charts[0].records[0].update_count, 2);
}

// ============================================================================
// SECTION: Acknowledgement
// ============================================================================

#[test]
fn next_batch_waits_for_ack() {
    let harness = Harness::new("next_batch_waits_for_ack");
    let (node_id, remote) = harness.claimed_node();
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    harness.tick(&node_id);
    harness.stage(&node_id, Command::AddChart, EntityId::random());

    harness.tick(&node_id);
    assert_eq!(harness.publisher.chart_batches().len(), 1);

    harness
        .registry
        .deliver_chart_ack(
            Some(&remote.to_string()),
            AckTarget::Batch {
                batch_id: BatchId::new(1),
            },
        )
        .unwrap();
    harness.tick(&node_id);

    let charts = harness.publisher.chart_batches();
    assert_eq!(charts.len(), 2);
    assert_eq!(charts[1].batch_id, BatchId::new(2));
    assert_eq!(sequences(&charts[1]), vec![2]);
    let status = harness.status(&node_id, Stream::Charts);
    assert_eq!(status.acked, 1);
    assert_eq!(status.sent, 1);
}

// ============================================================================
// SECTION: Resend
// ============================================================================

#[test]
fn publish_failure_abandons_batch_and_resends_later() {
    let harness = Harness::new("publish_failure_abandons_batch_and_resends_later");
    let (node_id, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    harness.stage(&node_id, Command::AddChart, EntityId::random());

    harness.publisher.set_failing(true);
    let outcome = harness.run(&node_id, Command::PushChart);
    assert!(matches!(outcome, CommandOutcome::Failed(_)));
    let status = harness.status(&node_id, Stream::Charts);
    assert_eq!(status.open_batch_id, None);
    assert_eq!(harness.registry.worker(&node_id).unwrap().stats().errors, 1);

    harness.publisher.set_failing(false);
    assert_eq!(harness.run(&node_id, Command::PushChart), CommandOutcome::Completed);
    let charts = harness.publisher.chart_batches();
    assert_eq!(charts.len(), 1);
    assert_eq!(charts[0].batch_id, BatchId::new(2));
    assert_eq!(sequences(&charts[0]), vec![1, 2]);
}

#[test]
fn unacked_batch_is_resent_after_its_lifetime() {
    let harness = Harness::new("unacked_batch_is_resent_after_its_lifetime");
    let (node_id, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddAlert, EntityId::random());
    harness.tick(&node_id);

    harness.clock.advance(harness.worker_config.batch_lifetime_secs - 1);
    harness.tick(&node_id);
    assert_eq!(harness.publisher.alert_batches().len(), 1);

    harness.clock.advance(1);
    harness.tick(&node_id);
    let alerts = harness.publisher.alert_batches();
    assert_eq!(alerts.len(), 2);
    assert_eq!(alerts[1].batch_id, BatchId::new(2));
    assert_eq!(sequences(&alerts[1]), vec![1]);
}

// ============================================================================
// SECTION: Housekeeping
// ============================================================================

#[test]
fn cleanup_prunes_expired_acks_once_due() {
    let harness = Harness::new("cleanup_prunes_expired_acks_once_due");
    let (node_id, _) = harness.claimed_node();
    for _ in 0 .. 2 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }
    harness.tick(&node_id);
    let ack = Command::ChartAck(AckTarget::UpTo {
        sequence_id: SequenceId::new(2),
    });
    assert_eq!(harness.run(&node_id, ack), CommandOutcome::Completed);

    harness.tick(&node_id);
    assert_eq!(harness.status(&node_id, Stream::Charts).acked, 2);

    harness.clock.advance(harness.worker_config.ack_retention_secs + 1);
    harness.tick(&node_id);
    let status = harness.status(&node_id, Stream::Charts);
    assert_eq!(status.acked, 0);
    assert_eq!(status.last_sequence_id.get(), 2);
}

#[test]
fn rotation_keeps_newest_acked_rows() {
    let config = WorkerConfig {
        max_acked_rows: 2,
        ..WorkerConfig::default()
    };
    let harness = Harness::with_config("rotation_keeps_newest_acked_rows", config);
    let (node_id, _) = harness.claimed_node();
    for _ in 0 .. 4 {
        harness.stage(&node_id, Command::AddChart, EntityId::random());
    }
    harness.tick(&node_id);
    let ack = Command::ChartAck(AckTarget::Batch {
        batch_id: BatchId::new(1),
    });
    assert_eq!(harness.run(&node_id, ack), CommandOutcome::Completed);

    assert_eq!(harness.run(&node_id, Command::CheckRotation), CommandOutcome::Completed);

    let records = harness.records(&node_id, Stream::Charts);
    let kept: Vec<u64> = records
        .iter()
        .filter(|record| record.status == RecordStatus::Ack)
        .map(|record| record.sequence_id.get())
        .collect();
    assert_eq!(kept, vec![3, 4]);
}

#[test]
fn status_and_health_are_published_on_request() {
    let harness = Harness::new("status_and_health_are_published_on_request");
    let (node_id, _) = harness.claimed_node();
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    harness.stage(&node_id, Command::AddAlert, EntityId::random());

    assert_eq!(harness.run(&node_id, Command::StatusChart), CommandOutcome::Completed);
    assert_eq!(harness.run(&node_id, Command::AlarmHealthLog), CommandOutcome::Completed);

    let messages = harness.publisher.messages();
    assert_eq!(harness.publisher.kinds(), vec!["stream_status", "alert_health_log"]);
    match (&messages[0], &messages[1]) {
        (
            OutboundMessage::StreamStatus {
                status: charts,
                ..
            },
            OutboundMessage::AlertHealthLog {
                status: alerts,
                ..
            },
        ) => {
            assert_eq!(charts.stream, Stream::Charts);
            assert_eq!(charts.pending, 1);
            assert_eq!(alerts.stream, Stream::Alerts);
            assert_eq!(alerts.pending, 1);
        }
        other => panic!("unexpected messages {other:?}"),
    }
}

#[test]
fn config_payloads_are_forwarded() {
    let harness = Harness::new("config_payloads_are_forwarded");
    let (node_id, _) = harness.claimed_node();
    let command = Command::PushAlertConfig {
        config_hash: "a1b2".to_string(),
        payload: b"alarm: cpu".to_vec(),
    };

    assert_eq!(harness.run(&node_id, command), CommandOutcome::Completed);

    match &harness.publisher.messages()[0] {
        OutboundMessage::AlertConfig {
            config_hash,
            payload,
            ..
        } => {
            assert_eq!(config_hash, "a1b2");
            assert_eq!(payload, b"alarm: cpu");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn chart_config_payloads_are_forwarded_once_claimed() {
    let harness = Harness::new("chart_config_payloads_are_forwarded_once_claimed");
    let unclaimed = NodeId::random();
    harness.add_node(unclaimed, None);
    let (node_id, remote) = harness.claimed_node();
    let command = || Command::PushChartConfig {
        config_hash: "c3d4".to_string(),
        payload: b"chart: cpu.user".to_vec(),
    };

    assert_eq!(harness.run(&unclaimed, command()), CommandOutcome::Completed);
    assert!(harness.publisher.messages().is_empty());
    assert_eq!(harness.run(&node_id, command()), CommandOutcome::Completed);

    let messages = harness.publisher.messages();
    assert_eq!(messages.len(), 1);
    match &messages[0] {
        OutboundMessage::ChartConfig {
            node_id: sender,
            remote_node_id,
            config_hash,
            payload,
        } => {
            assert_eq!(*sender, node_id);
            assert_eq!(*remote_node_id, remote);
            assert_eq!(config_hash, "c3d4");
            assert_eq!(payload, b"chart: cpu.user");
        }
        other => panic!("unexpected message {other:?}"),
    }
}

#[test]
fn dedup_pass_keeps_rows_awaiting_delivery() {
    let harness = Harness::new("dedup_pass_keeps_rows_awaiting_delivery");
    let (node_id, remote) = harness.claimed_node();
    let restaged = EntityId::random();
    harness.stage(&node_id, Command::AddChart, restaged);
    harness.stage(&node_id, Command::AddChart, EntityId::random());
    harness.tick(&node_id);
    harness.stage(&node_id, Command::AddChart, restaged);
    let before = harness.records(&node_id, Stream::Charts);

    assert_eq!(harness.run(&node_id, Command::DedupChart), CommandOutcome::Completed);

    let after = harness.records(&node_id, Stream::Charts);
    let summary = |records: &[StagedRecord]| -> Vec<(u64, RecordStatus)> {
        records.iter().map(|record| (record.sequence_id.get(), record.status)).collect()
    };
    assert_eq!(summary(&after), summary(&before));
    assert_eq!(
        summary(&after),
        vec![(1, RecordStatus::Sent), (2, RecordStatus::Sent), (3, RecordStatus::Pending)]
    );

    harness
        .registry
        .deliver_chart_ack(
            Some(&remote.to_string()),
            AckTarget::Batch {
                batch_id: BatchId::new(1),
            },
        )
        .unwrap();
    harness.tick(&node_id);
    let charts = harness.publisher.chart_batches();
    assert_eq!(charts.len(), 2);
    assert_eq!(sequences(&charts[1]), vec![3]);
}
