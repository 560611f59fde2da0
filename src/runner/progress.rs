//! Batch Progress Streaming
//!
//! Event-based progress reporting for batch runs.
//!
//! The runner writes progress, result and error events into an abstract
//! sink backed by a broadcast channel; any frontend (CLI renderer, TUI,
//! tests) subscribes without the runner knowing it exists. Events are
//! dropped silently when nobody is listening.

use tokio::sync::broadcast;

use crate::types::{DocumentId, ErrorKind, TaskStatus, TokenUsage};

/// Capacity of the event channel; laggy subscribers lose oldest events
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Progress, result and error events emitted during a batch run.
///
/// Events for a batch are emitted in submission order; a document's
/// terminal event is always emitted before the next document starts.
#[derive(Debug, Clone)]
pub enum TaskEvent {
    /// Batch accepted; emitted once before any document starts
    BatchStarted {
        batch_id: String,
        total_documents: usize,
    },
    /// A document left the pending state
    DocumentStarted {
        document_id: DocumentId,
        /// Position in the submission order, starting at 0
        index: usize,
        total: usize,
    },
    /// A document changed status; progress is the fraction of its chunks
    /// completed (0.0 - 1.0)
    StatusChanged {
        document_id: DocumentId,
        status: TaskStatus,
        progress: f32,
    },
    /// One chunk finished successfully
    ChunkCompleted {
        document_id: DocumentId,
        chunk_index: usize,
        chunk_count: usize,
        attempt_count: u32,
    },
    /// A document reached a terminal status
    DocumentFinished {
        document_id: DocumentId,
        status: TaskStatus,
        /// Human-readable failure message, when failed or cancelled
        message: Option<String>,
        /// Structured failure kind, when failed or cancelled
        error_kind: Option<ErrorKind>,
        /// Attempts consumed by the last invocation
        attempt_count: u32,
        usage: TokenUsage,
    },
    /// The whole batch resolved
    BatchFinished {
        batch_id: String,
        succeeded: usize,
        failed: usize,
        cancelled: usize,
        usage: TokenUsage,
        duration_secs: u64,
    },
}

/// Broadcast-backed event sink.
///
/// Cloning shares the underlying channel, so the runner and any number of
/// renderers can hold the same sink.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<TaskEvent>,
}

impl EventSink {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Send an event. Silently discards if no receivers are listening
    /// (expected when no frontend is attached).
    #[inline]
    pub fn emit(&self, event: TaskEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events from this sink
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventSink {
    fn default() -> Self {
        Self::new()
    }
}
