// crates/cloudlink-cli/src/spool.rs
// ============================================================================
// Module: Spool Publisher
// Description: PublishChannel writing outbound messages as JSON lines.
// Purpose: Let the agent run without a live collector link.
// Dependencies: cloudlink-core, serde_json
// ============================================================================

//! ## Overview
//! [`SpoolPublisher`] serializes every [`OutboundMessage`] to one JSON line
//! on its writer. Writes are serialized through a mutex so lines from
//! different workers never interleave. A failed write is reported as
//! [`PublishError::Unavailable`], which makes the worker abandon the batch.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::io::Write;
use std::sync::Mutex;

use cloudlink_core::OutboundMessage;
use cloudlink_core::PublishChannel;
use cloudlink_core::PublishError;

// ============================================================================
// SECTION: Publisher
// ============================================================================

/// JSON-lines publish channel.
#[derive(Debug)]
pub struct SpoolPublisher<W> {
    /// Output sink.
    writer: Mutex<W>,
}

impl<W: Write + Send> SpoolPublisher<W> {
    /// Creates a publisher writing to `writer`.
    #[must_use]
    pub const fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Unavailable`] when the writer lock is poisoned.
    pub fn into_inner(self) -> Result<W, PublishError> {
        self.writer
            .into_inner()
            .map_err(|_| PublishError::Unavailable("spool writer poisoned".to_string()))
    }
}

impl<W: Write + Send> PublishChannel for SpoolPublisher<W> {
    fn publish(&self, message: OutboundMessage) -> Result<(), PublishError> {
        let mut line = serde_json::to_vec(&message)
            .map_err(|err| PublishError::Rejected(err.to_string()))?;
        line.push(b'\n');
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| PublishError::Unavailable("spool writer poisoned".to_string()))?;
        writer
            .write_all(&line)
            .and_then(|()| writer.flush())
            .map_err(|err| PublishError::Unavailable(err.to_string()))
    }
}
