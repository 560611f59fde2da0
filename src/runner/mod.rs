//! Sequential Batch Orchestration
//!
//! Drives a batch of documents through token budgeting, chunking and
//! backend invocation, one document at a time.
//!
//! ## Sequencing
//!
//! Documents resolve strictly in submission order, and within a document
//! chunks run strictly sequentially - no two backend calls from the same
//! batch are ever in flight together. Backend rate limits and the shared
//! token count cache make sequential execution far simpler to reason about
//! than parallel dispatch; the cost is per-batch throughput.
//!
//! ## State machine
//!
//! Per document: `Pending → Chunking (if oversized) → InProgress ⇄ Retrying
//! → Succeeded | Failed | Cancelled`. A fatal chunk failure fails the whole
//! document and discards partial output; a failed document never aborts the
//! batch. Cancellation is cooperative: checked before each document, each
//! chunk and each retry attempt, and in-flight calls finish with their
//! results discarded.

pub mod progress;

pub use progress::{EventSink, TaskEvent};

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ModelProfile;
use crate::llm::chunker::{Chunk, Chunker};
use crate::llm::provider::SharedAdapter;
use crate::llm::retry::{RetryPolicy, RetryingInvoker};
use crate::llm::token_counter::TokenCounter;
use crate::types::{
    BackendError, CancelHandle, DocumentInput, DocumentTask, ErrorKind, GenerationRequest,
    GenerationSettings, InvocationResult, TaskStatus, TokenUsage,
};

/// Sequential batch orchestrator.
///
/// Owns its adapter, budget profile and retry policy for the lifetime of a
/// batch run; adapter instances are not shared across concurrent batches.
pub struct DocumentTaskRunner {
    adapter: SharedAdapter,
    counter: TokenCounter,
    chunker: Chunker,
    policy: RetryPolicy,
    profile: ModelProfile,
    events: EventSink,
    cancel: CancelHandle,
}

impl DocumentTaskRunner {
    pub fn new(adapter: SharedAdapter, profile: ModelProfile, policy: RetryPolicy) -> Self {
        let counter = TokenCounter::for_backend(adapter.backend_id());
        Self {
            chunker: Chunker::new(counter.clone()),
            counter,
            adapter,
            policy,
            profile,
            events: EventSink::new(),
            cancel: CancelHandle::new(),
        }
    }

    /// The event sink this runner reports through; subscribe before calling
    /// `run_batch` to observe every event
    pub fn events(&self) -> &EventSink {
        &self.events
    }

    /// Cancellation handle for this runner's batches
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Process a batch of documents sequentially.
    ///
    /// The returned tasks are in submission order, every one resolved to a
    /// terminal status. Terminal events are likewise emitted in submission
    /// order.
    #[instrument(skip_all, fields(documents = documents.len(), model = %settings.model_id))]
    pub async fn run_batch(
        &self,
        settings: &GenerationSettings,
        documents: Vec<DocumentInput>,
    ) -> Vec<DocumentTask> {
        let batch_id = Uuid::new_v4().to_string();
        let started = Instant::now();
        let total = documents.len();

        info!(batch = %batch_id, documents = total, "batch started");
        self.events.emit(TaskEvent::BatchStarted {
            batch_id: batch_id.clone(),
            total_documents: total,
        });

        let mut tasks: Vec<DocumentTask> = Vec::with_capacity(total);
        let mut totals = TokenUsage::default();

        for (index, input) in documents.iter().enumerate() {
            // After cancellation, remaining documents are never started
            if self.cancel.is_cancelled() {
                let mut task = DocumentTask::new(input);
                task.cancel();
                self.finish_document(&task);
                tasks.push(task);
                continue;
            }

            self.events.emit(TaskEvent::DocumentStarted {
                document_id: input.id.clone(),
                index,
                total,
            });

            let task = self.process_document(settings, input).await;
            totals.absorb(&task.usage);
            self.finish_document(&task);
            tasks.push(task);
        }

        let succeeded = count_status(&tasks, TaskStatus::Succeeded);
        let failed = count_status(&tasks, TaskStatus::Failed);
        let cancelled = count_status(&tasks, TaskStatus::Cancelled);

        info!(
            batch = %batch_id,
            succeeded,
            failed,
            cancelled,
            total_tokens = totals.total(),
            "batch finished"
        );
        self.events.emit(TaskEvent::BatchFinished {
            batch_id,
            succeeded,
            failed,
            cancelled,
            usage: totals,
            duration_secs: started.elapsed().as_secs(),
        });

        tasks
    }

    /// Drive one document to a terminal status
    async fn process_document(
        &self,
        settings: &GenerationSettings,
        input: &DocumentInput,
    ) -> DocumentTask {
        let mut task = DocumentTask::new(input);
        let usable = self.profile.usable_tokens();
        let doc_tokens = self.counter.count(&input.text).tokens;

        let chunks = if doc_tokens > usable {
            task.status = TaskStatus::Chunking;
            self.emit_status(&task, 0.0);
            info!(
                document = %input.id,
                doc_tokens,
                usable,
                "document exceeds usable budget, chunking"
            );

            match self
                .chunker
                .split(&input.text, usable, self.profile.overlap_tokens)
            {
                Ok(chunks) => chunks,
                Err(err) => {
                    warn!(document = %input.id, error = %err, "chunking failed");
                    task.fail(BackendError::new(ErrorKind::InvalidRequest, err.to_string()));
                    return task;
                }
            }
        } else {
            vec![Chunk {
                index: 0,
                text: input.text.clone(),
                token_count: doc_tokens,
                overlap_chars: 0,
            }]
        };

        task.status = TaskStatus::InProgress;
        self.emit_status(&task, 0.0);

        let chunk_count = chunks.len();
        debug!(document = %input.id, chunks = chunk_count, "processing chunks");

        // Capability routing: a requested thinking budget is dropped with a
        // visible warning when the backend lacks the capability; the adapter
        // itself would refuse rather than downgrade.
        let thinking = match settings.thinking_budget {
            Some(budget) if self.adapter.limits().supports_extended_thinking => Some(budget),
            Some(_) => {
                warn!(
                    backend = self.adapter.backend_id(),
                    "extended thinking not supported by backend, using standard generation"
                );
                None
            }
            None => None,
        };

        for chunk in &chunks {
            if self.cancel.is_cancelled() {
                task.cancel();
                return task;
            }

            let result = self.invoke_chunk(settings, input, chunk, chunk_count, thinking).await;
            task.attempt_count = result.attempt_count;

            // In-flight results observed after a cancellation request are
            // discarded, per the cooperative cancellation contract
            if result.error_kind() == Some(ErrorKind::Cancelled) || self.cancel.is_cancelled() {
                task.cancel();
                return task;
            }

            if result.is_success() {
                task.status = TaskStatus::InProgress;
                task.usage.absorb(&result.usage);
                self.events.emit(TaskEvent::ChunkCompleted {
                    document_id: input.id.clone(),
                    chunk_index: chunk.index,
                    chunk_count,
                    attempt_count: result.attempt_count,
                });
                task.chunk_results.push(result);
                let progress = task.chunk_results.len() as f32 / chunk_count as f32;
                self.emit_status(&task, progress);
            } else {
                let error = result.error.clone().unwrap_or_else(|| {
                    BackendError::new(ErrorKind::BackendInternal, "invocation failed")
                });
                warn!(
                    document = %input.id,
                    chunk = chunk.index,
                    kind = %error.kind,
                    "chunk failed fatally, document fails"
                );
                task.fail(error);
                return task;
            }
        }

        let merged = merge_outputs(&task.chunk_results);
        task.succeed(merged);
        task
    }

    /// Send one chunk through the retrying invoker
    async fn invoke_chunk(
        &self,
        settings: &GenerationSettings,
        input: &DocumentInput,
        chunk: &Chunk,
        chunk_count: usize,
        thinking: Option<u32>,
    ) -> InvocationResult {
        let request = chunk_request(settings, chunk, chunk_count);

        let events = self.events.clone();
        let document_id = input.id.clone();
        let chunk_progress = chunk.index as f32 / chunk_count as f32;
        let invoker = RetryingInvoker::new(self.policy.clone(), self.cancel.clone()).with_on_retry(
            move |_attempt| {
                events.emit(TaskEvent::StatusChanged {
                    document_id: document_id.clone(),
                    status: TaskStatus::Retrying,
                    progress: chunk_progress,
                });
            },
        );

        let adapter = Arc::clone(&self.adapter);
        invoker
            .invoke(
                self.adapter.backend_id(),
                self.adapter.model_id(),
                move |_attempt| {
                    let adapter = Arc::clone(&adapter);
                    let request = request.clone();
                    async move {
                        match thinking {
                            Some(budget) => adapter.generate_extended(&request, budget).await,
                            None => adapter.generate(&request).await,
                        }
                    }
                },
            )
            .await
    }

    fn emit_status(&self, task: &DocumentTask, progress: f32) {
        self.events.emit(TaskEvent::StatusChanged {
            document_id: task.document_id.clone(),
            status: task.status,
            progress,
        });
    }

    fn finish_document(&self, task: &DocumentTask) {
        self.events.emit(TaskEvent::DocumentFinished {
            document_id: task.document_id.clone(),
            status: task.status,
            message: task.error.as_ref().map(|e| e.message.clone()),
            error_kind: task.error.as_ref().map(|e| e.kind),
            attempt_count: task.attempt_count,
            usage: task.usage,
        });
    }
}

/// Build the per-chunk request. Multi-chunk documents get a continuation
/// preamble so the model treats the seeded overlap as context rather than
/// content to re-report.
fn chunk_request(
    settings: &GenerationSettings,
    chunk: &Chunk,
    chunk_count: usize,
) -> GenerationRequest {
    if chunk_count == 1 {
        return GenerationRequest::for_text(settings, &chunk.text);
    }

    let mut preamble = format!(
        "The source document is processed in {} sequential parts; this is part {}.",
        chunk_count,
        chunk.index + 1
    );
    if chunk.overlaps_previous() {
        preamble.push_str(
            " The beginning of this part repeats the tail of the previous part \
             for context only; do not re-report it.",
        );
    }

    let mut augmented = settings.clone();
    augmented.system_prompt = format!("{}\n\n{}", settings.system_prompt, preamble);
    GenerationRequest::for_text(&augmented, &chunk.text)
}

/// Merge per-chunk outputs in chunk index order.
///
/// Outputs are joined with a blank line. Overlap regions were flagged as
/// context-only at prompt time, so no similarity-based deduplication of
/// generated text is attempted here.
fn merge_outputs(results: &[InvocationResult]) -> String {
    results
        .iter()
        .filter_map(|r| r.content.as_deref())
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn count_status(tasks: &[DocumentTask], status: TaskStatus) -> usize {
    tasks.iter().filter(|t| t.status == status).count()
}

// =============================================================================
// Tests
// =============================================================================
