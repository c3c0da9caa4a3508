// system-tests/tests/helpers/publisher.rs
// ============================================================================
// Module: Recording Publisher
// Description: PublishChannel that captures messages for assertions.
// Purpose: Observe what workers send and simulate transport outages.
// Dependencies: cloudlink-core
// ============================================================================

use std::sync::Condvar;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use cloudlink_core::BatchMessage;
use cloudlink_core::OutboundMessage;
use cloudlink_core::PublishChannel;
use cloudlink_core::PublishError;

/// Captures outbound messages; can fail or hold publishes on demand.
#[derive(Debug, Default)]
pub struct RecordingPublisher {
    messages: Mutex<Vec<OutboundMessage>>,
    failing: AtomicBool,
    held: Mutex<bool>,
    released: Condvar,
    waiting: AtomicUsize,
}

impl RecordingPublisher {
    /// Makes every publish fail with `Unavailable` while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Blocks publishes until [`RecordingPublisher::release`].
    pub fn hold(&self) {
        *self.held.lock().unwrap() = true;
    }

    /// Unblocks held publishes.
    pub fn release(&self) {
        *self.held.lock().unwrap() = false;
        self.released.notify_all();
    }

    /// Number of publishes currently blocked by [`RecordingPublisher::hold`].
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    /// Returns every captured message.
    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Returns captured chart batch chunks.
    pub fn chart_batches(&self) -> Vec<BatchMessage> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::ChartBatch(batch) => Some(batch),
                _ => None,
            })
            .collect()
    }

    /// Returns captured alert batch chunks.
    pub fn alert_batches(&self) -> Vec<BatchMessage> {
        self.messages()
            .into_iter()
            .filter_map(|message| match message {
                OutboundMessage::AlertBatch(batch) => Some(batch),
                _ => None,
            })
            .collect()
    }

    /// Returns the kinds of captured messages in publish order.
    pub fn kinds(&self) -> Vec<&'static str> {
        self.messages().iter().map(OutboundMessage::kind).collect()
    }
}

impl PublishChannel for RecordingPublisher {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        {
            let mut held = self.held.lock().unwrap();
            if *held {
                self.waiting.fetch_add(1, Ordering::SeqCst);
                while *held {
                    held = self.released.wait(held).unwrap();
                }
                self.waiting.fetch_sub(1, Ordering::SeqCst);
            }
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(PublishError::Unavailable("collector offline".to_string()));
        }
        self.messages.lock().unwrap().push(message);
        Ok(())
    }
}
