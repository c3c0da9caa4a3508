// crates/cloudlink-core/src/runtime/queue.rs
// ============================================================================
// Module: Cloudlink Command Queue
// Description: Bounded multi-producer, single-consumer FIFO of commands.
// Purpose: Serialize every command for a node onto its one worker.
// Dependencies: crate::runtime::{command, completion}, std::sync::mpsc
// ============================================================================

//! ## Overview
//! A [`CommandQueue`] is the cloneable producer side; the [`CommandReceiver`]
//! belongs to the worker. Commands are delivered in enqueue order. Blocking
//! submission waits for space; non-blocking submission fails fast with
//! [`SyncError::QueueFull`]. Each submission is stamped with a unique ticket
//! number; tickets taken by one producer increase in its submission order.
//!
//! Security posture: the queue is bounded so a flood of producers cannot grow
//! memory without limit.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::mpsc;
use std::sync::mpsc::TrySendError;
use std::time::Instant;

use crate::runtime::command::Command;
use crate::runtime::completion::Completer;
use crate::runtime::error::SyncError;

// ============================================================================
// SECTION: Types
// ============================================================================

/// Default queue capacity per node.
pub const DEFAULT_QUEUE_CAPACITY: usize = 2048;

/// Command accepted onto a queue.
#[derive(Debug)]
pub struct QueuedCommand {
    /// Ticket number assigned at acceptance.
    pub ticket: u64,
    /// Time the command was accepted.
    pub enqueued_at: Instant,
    /// Command payload.
    pub command: Command,
    /// Completion fired after processing, when the producer asked for one.
    pub completer: Option<Completer>,
}

/// Submission behaviour when the queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitMode {
    /// Wait until space is available.
    Blocking,
    /// Fail immediately with [`SyncError::QueueFull`].
    NonBlocking,
}

/// Ticket counter and depth shared by both queue halves.
#[derive(Debug, Default)]
struct QueueShared {
    /// Next ticket to hand out.
    next_ticket: AtomicU64,
    /// Commands accepted and not yet dequeued.
    depth: AtomicUsize,
}

// ============================================================================
// SECTION: Constructor
// ============================================================================

/// Creates a bounded command queue.
///
/// # Errors
///
/// Returns [`SyncError::InvalidRequest`] when `capacity` is zero.
pub fn command_queue(capacity: usize) -> Result<(CommandQueue, CommandReceiver), SyncError> {
    if capacity == 0 {
        return Err(SyncError::InvalidRequest("queue capacity must be greater than zero".into()));
    }
    let (sender, receiver) = mpsc::sync_channel(capacity);
    let shared = Arc::new(QueueShared::default());
    Ok((
        CommandQueue {
            sender,
            shared: Arc::clone(&shared),
            capacity,
        },
        CommandReceiver {
            receiver,
            shared,
        },
    ))
}

// ============================================================================
// SECTION: Producer Side
// ============================================================================

/// Cloneable producer handle of a command queue.
#[derive(Debug, Clone)]
pub struct CommandQueue {
    /// Bounded channel sender.
    sender: mpsc::SyncSender<QueuedCommand>,
    /// Shared ticket counter and depth.
    shared: Arc<QueueShared>,
    /// Configured capacity.
    capacity: usize,
}

impl CommandQueue {
    /// Enqueues a command, returning its ticket number.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::QueueFull`] for a non-blocking submission into a
    /// full queue and [`SyncError::WorkerStopped`] when the receiver is gone.
    pub fn enqueue(
        &self,
        command: Command,
        completer: Option<Completer>,
        mode: SubmitMode,
    ) -> Result<u64, SyncError> {
        let ticket = self.shared.next_ticket.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedCommand {
            ticket,
            enqueued_at: Instant::now(),
            command,
            completer,
        };
        // Depth is raised before the send so the consumer never observes an
        // underflow; it is rolled back when the send fails.
        self.shared.depth.fetch_add(1, Ordering::SeqCst);
        let sent = match mode {
            SubmitMode::Blocking => {
                self.sender.send(queued).map_err(|_| SyncError::WorkerStopped)
            }
            SubmitMode::NonBlocking => self.sender.try_send(queued).map_err(|err| match err {
                TrySendError::Full(_) => SyncError::QueueFull,
                TrySendError::Disconnected(_) => SyncError::WorkerStopped,
            }),
        };
        if let Err(err) = sent {
            self.shared.depth.fetch_sub(1, Ordering::SeqCst);
            return Err(err);
        }
        Ok(ticket)
    }

    /// Returns the number of commands accepted and not yet dequeued.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }

    /// Returns the configured capacity.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }
}

// ============================================================================
// SECTION: Consumer Side
// ============================================================================

/// Worker-owned consumer handle of a command queue.
#[derive(Debug)]
pub struct CommandReceiver {
    /// Bounded channel receiver.
    receiver: mpsc::Receiver<QueuedCommand>,
    /// Shared ticket counter and depth.
    shared: Arc<QueueShared>,
}

impl CommandReceiver {
    /// Blocks for the next command; `None` once every producer is gone and
    /// the queue is empty.
    #[must_use]
    pub fn dequeue(&self) -> Option<QueuedCommand> {
        let queued = self.receiver.recv().ok()?;
        self.shared.depth.fetch_sub(1, Ordering::SeqCst);
        Some(queued)
    }

    /// Returns the next command without blocking.
    #[must_use]
    pub fn try_dequeue(&self) -> Option<QueuedCommand> {
        let queued = self.receiver.try_recv().ok()?;
        self.shared.depth.fetch_sub(1, Ordering::SeqCst);
        Some(queued)
    }

    /// Returns the number of commands accepted and not yet dequeued.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.shared.depth.load(Ordering::SeqCst)
    }
}
