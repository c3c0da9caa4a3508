// crates/cloudlink-core/src/runtime/completion.rs
// ============================================================================
// Module: Cloudlink Completion Handles
// Description: Single-fire completion shared between a producer and a worker.
// Purpose: Let a producer block until its command has been processed.
// Dependencies: std::sync::mpsc
// ============================================================================

//! ## Overview
//! [`completion_pair`] returns a worker-side [`Completer`] and a producer-side
//! [`CompletionHandle`]. Completing consumes the completer, so a completion
//! fires at most once. The outcome is buffered, so completing before the
//! producer starts waiting is not lost. A completer dropped without firing
//! resolves the handle as [`CommandOutcome::Cancelled`].

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::mpsc;
use std::time::Duration;

use serde::Serialize;

// ============================================================================
// SECTION: Outcome
// ============================================================================

/// Final disposition of a submitted command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The worker processed the command.
    Completed,
    /// The worker processed the command and the handler failed.
    Failed(String),
    /// The command was discarded without being processed.
    Cancelled,
}

impl CommandOutcome {
    /// Returns true for [`CommandOutcome::Completed`].
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed)
    }
}

// ============================================================================
// SECTION: Completion Pair
// ============================================================================

/// Creates a linked completer and handle.
#[must_use]
pub fn completion_pair() -> (Completer, CompletionHandle) {
    let (sender, receiver) = mpsc::sync_channel(1);
    (
        Completer {
            sender,
        },
        CompletionHandle {
            receiver,
        },
    )
}

/// Worker-side half of a completion.
#[derive(Debug)]
pub struct Completer {
    /// One-slot channel carrying the outcome.
    sender: mpsc::SyncSender<CommandOutcome>,
}

impl Completer {
    /// Fires the completion.
    pub fn complete(self, outcome: CommandOutcome) {
        // A producer that stopped waiting is not an error.
        let _ = self.sender.try_send(outcome);
    }
}

/// Producer-side half of a completion.
#[derive(Debug)]
pub struct CompletionHandle {
    /// One-slot channel carrying the outcome.
    receiver: mpsc::Receiver<CommandOutcome>,
}

impl CompletionHandle {
    /// Blocks until the command completes or is cancelled.
    #[must_use]
    pub fn wait(self) -> CommandOutcome {
        self.receiver.recv().unwrap_or(CommandOutcome::Cancelled)
    }

    /// Blocks for at most `timeout`; returns `None` when it elapses first.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<CommandOutcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(outcome) => Some(outcome),
            Err(mpsc::RecvTimeoutError::Timeout) => None,
            Err(mpsc::RecvTimeoutError::Disconnected) => Some(CommandOutcome::Cancelled),
        }
    }

    /// Returns the outcome if it is already available.
    #[must_use]
    pub fn try_wait(&self) -> Option<CommandOutcome> {
        match self.receiver.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(mpsc::TryRecvError::Empty) => None,
            Err(mpsc::TryRecvError::Disconnected) => Some(CommandOutcome::Cancelled),
        }
    }
}
