//! Core Value Types
//!
//! Plain data carried between the chunking, invocation and orchestration
//! layers. All of these are constructed once and passed by value or
//! reference; none embed control flow.

pub mod error;

pub use error::{BackendError, ErrorClassifier, ErrorKind, ForgeError, Result};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag shared between the caller and a batch run.
///
/// Cancellation is observed, never preemptive: the runner checks the flag
/// before starting a document, a chunk, or a retry attempt, and in-flight
/// backend calls are allowed to finish with their results discarded.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// =============================================================================
// Domain Newtypes
// =============================================================================

/// Type-safe wrapper for document identifiers
///
/// Prevents accidental mixing of document ids with other string types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl AsRef<str> for DocumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Token Usage
// =============================================================================

/// Token usage metrics reported per invocation and aggregated per document
/// and batch
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens (prompt + document)
    pub input_tokens: u32,
    /// Output tokens (generated text)
    pub output_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Total tokens used (input + output)
    pub fn total(&self) -> u32 {
        self.input_tokens + self.output_tokens
    }

    /// Accumulate another usage record into this one
    pub fn absorb(&mut self, other: &TokenUsage) {
        self.input_tokens = self.input_tokens.saturating_add(other.input_tokens);
        self.output_tokens = self.output_tokens.saturating_add(other.output_tokens);
    }
}

// =============================================================================
// Generation Request
// =============================================================================

/// Caller-supplied parameters shared by every document in a batch
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    /// System prompt sent with every call
    pub system_prompt: String,
    /// User prompt template; a `{document}` placeholder receives the
    /// (chunk) text, otherwise the text is appended after a separator
    pub user_prompt: String,
    /// Target model identifier
    pub model_id: String,
    /// Sampling temperature (0.0 = deterministic)
    pub temperature: f32,
    /// Maximum tokens to generate per call
    pub max_output_tokens: u32,
    /// Extended thinking budget; None disables extended mode
    pub thinking_budget: Option<u32>,
}

/// A single backend call: one document (or one chunk of one) plus prompts
/// and generation parameters. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The text to transform (whole document or one chunk)
    pub document_text: String,
    /// System prompt
    pub system_prompt: String,
    /// Rendered user prompt (placeholder already substituted)
    pub user_prompt: String,
    /// Target model identifier
    pub model_id: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_output_tokens: u32,
    /// Extended thinking budget; None disables extended mode
    pub thinking_budget: Option<u32>,
}

impl GenerationRequest {
    /// Build the per-call request for a piece of document text.
    ///
    /// This is the only template handling the core performs: the
    /// `{document}` placeholder is replaced with the text; prompts without
    /// the placeholder get the text appended after a separator.
    pub fn for_text(settings: &GenerationSettings, text: &str) -> Self {
        let user_prompt = if settings.user_prompt.contains("{document}") {
            settings.user_prompt.replace("{document}", text)
        } else {
            format!("{}\n\n---\n\n{}", settings.user_prompt, text)
        };

        Self {
            document_text: text.to_string(),
            system_prompt: settings.system_prompt.clone(),
            user_prompt,
            model_id: settings.model_id.clone(),
            temperature: settings.temperature,
            max_output_tokens: settings.max_output_tokens,
            thinking_budget: settings.thinking_budget,
        }
    }
}

// =============================================================================
// Invocation Result
// =============================================================================

/// Final outcome of one (possibly retried) backend invocation.
///
/// Built only through the constructors below so that a failure always
/// carries an error kind and never carries content.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    /// Generated text; present exactly when the invocation succeeded
    pub content: Option<String>,
    /// Classified failure; present exactly when the invocation failed
    pub error: Option<BackendError>,
    /// Token accounting for the final attempt
    pub usage: TokenUsage,
    /// Model that served (or refused) the call
    pub model_id: String,
    /// Backend that served the call
    pub backend_id: String,
    /// Attempts consumed across the whole retry sequence
    pub attempt_count: u32,
}

impl InvocationResult {
    /// Successful invocation
    pub fn success(
        content: String,
        usage: TokenUsage,
        model_id: impl Into<String>,
        backend_id: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self {
            content: Some(content),
            error: None,
            usage,
            model_id: model_id.into(),
            backend_id: backend_id.into(),
            attempt_count,
        }
    }

    /// Failed invocation; partial content from the failing attempt is
    /// deliberately dropped
    pub fn failure(
        error: BackendError,
        model_id: impl Into<String>,
        backend_id: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self {
            content: None,
            error: Some(error),
            usage: TokenUsage::default(),
            model_id: model_id.into(),
            backend_id: backend_id.into(),
            attempt_count,
        }
    }

    /// Invocation aborted by cancellation before (further) attempts
    pub fn cancelled(
        model_id: impl Into<String>,
        backend_id: impl Into<String>,
        attempt_count: u32,
    ) -> Self {
        Self::failure(
            BackendError::cancelled(),
            model_id,
            backend_id,
            attempt_count,
        )
    }

    pub fn is_success(&self) -> bool {
        self.content.is_some()
    }

    /// Failure kind, if the invocation failed
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}

// =============================================================================
// Document Task
// =============================================================================

/// Lifecycle states of one document within a batch.
///
/// Transitions move strictly forward except for the bounded
/// InProgress ⇄ Retrying loop; Cancelled may interrupt any non-terminal
/// state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Chunking,
    InProgress,
    Retrying,
    Succeeded,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Check whether this status ends the task
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Chunking => "chunking",
            Self::InProgress => "in_progress",
            Self::Retrying => "retrying",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// One document submitted for processing
#[derive(Debug, Clone)]
pub struct DocumentInput {
    /// Caller-assigned identifier
    pub id: DocumentId,
    /// Source path or label, used only for reporting
    pub source: String,
    /// Plain text content (format conversion happens upstream)
    pub text: String,
}

impl DocumentInput {
    pub fn new(id: impl Into<DocumentId>, source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            text: text.into(),
        }
    }
}

/// Per-document processing state, owned by the runner for the lifetime of
/// one batch run and handed to the caller when the batch resolves.
#[derive(Debug, Clone)]
pub struct DocumentTask {
    pub document_id: DocumentId,
    /// Source path or label
    pub source: String,
    pub status: TaskStatus,
    /// Per-chunk invocation results, in chunk index order
    pub chunk_results: Vec<InvocationResult>,
    /// Merged output; present exactly when status is Succeeded
    pub final_text: Option<String>,
    /// Aggregated token usage across all successful chunk invocations
    pub usage: TokenUsage,
    /// Terminal failure, when status is Failed or Cancelled
    pub error: Option<BackendError>,
    /// Attempts consumed by the most recent invocation; survives the
    /// partial-result discard on failure so error reports keep it
    pub attempt_count: u32,
}

impl DocumentTask {
    pub fn new(input: &DocumentInput) -> Self {
        Self {
            document_id: input.id.clone(),
            source: input.source.clone(),
            status: TaskStatus::Pending,
            chunk_results: Vec::new(),
            final_text: None,
            usage: TokenUsage::default(),
            error: None,
            attempt_count: 0,
        }
    }

    /// Mark the task succeeded with its merged output
    pub fn succeed(&mut self, final_text: String) {
        self.status = TaskStatus::Succeeded;
        self.final_text = Some(final_text);
    }

    /// Mark the task failed; any partial chunk output is discarded so a
    /// partial result is never reported as success
    pub fn fail(&mut self, error: BackendError) {
        self.status = TaskStatus::Failed;
        self.final_text = None;
        self.chunk_results.clear();
        self.usage = TokenUsage::default();
        self.error = Some(error);
    }

    /// Mark the task cancelled, discarding any partial output
    pub fn cancel(&mut self) {
        self.status = TaskStatus::Cancelled;
        self.final_text = None;
        self.chunk_results.clear();
        self.usage = TokenUsage::default();
        self.error = Some(BackendError::cancelled());
    }
}

// =============================================================================
// Tests
// =============================================================================
