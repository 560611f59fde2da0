//! Unified Error Type System
//!
//! Centralized error types for the entire application.
//! Backend failures are classified exactly once, at the adapter boundary,
//! into a fixed taxonomy that drives all retry decisions downstream.
//!
//! ## Error Kinds
//!
//! - **TransientNetwork**: connectivity blips, timeouts (retry with backoff)
//! - **RateLimited**: backend throttling (wait and retry)
//! - **BackendInternal**: 5xx-style server trouble (retry with backoff)
//! - **Authentication**: bad or missing credentials (fail fast)
//! - **InvalidRequest**: the request itself cannot succeed (fail fast)
//! - **Cancelled**: caller requested cancellation (terminal, not an error
//!   in the application sense)
//!
//! ## Design Principles
//!
//! - Single unified error type (ForgeError) for the entire application
//! - Classification happens once and is never revised upstream
//! - No panic/unwrap - all errors are recoverable or reported

use std::time::Duration;
use thiserror::Error;

// =============================================================================
// Error Kinds
// =============================================================================

/// Failure taxonomy for backend invocations.
///
/// The retrying layer consults `is_retryable` only; it never re-classifies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Connectivity problems, DNS failures, request timeouts
    TransientNetwork,
    /// Backend throttling (HTTP 429 and friends)
    RateLimited,
    /// Credentials rejected or missing - fail fast, don't retry
    Authentication,
    /// Malformed or impossible request - fail fast, fix the request
    InvalidRequest,
    /// Backend-side server errors (5xx)
    BackendInternal,
    /// Cancellation requested by the caller
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientNetwork => write!(f, "TRANSIENT_NETWORK"),
            Self::RateLimited => write!(f, "RATE_LIMITED"),
            Self::Authentication => write!(f, "AUTHENTICATION"),
            Self::InvalidRequest => write!(f, "INVALID_REQUEST"),
            Self::BackendInternal => write!(f, "BACKEND_INTERNAL"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

impl ErrorKind {
    /// Check if this kind is worth another attempt on the same backend
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TransientNetwork | Self::RateLimited | Self::BackendInternal
        )
    }

    /// Check if this kind terminates an invocation immediately
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication | Self::InvalidRequest)
    }

    /// Get recommended retry delay for this kind
    pub fn recommended_delay(&self) -> Duration {
        match self {
            Self::RateLimited => Duration::from_secs(30),
            Self::TransientNetwork => Duration::from_secs(5),
            Self::BackendInternal => Duration::from_secs(2),
            _ => Duration::from_millis(500),
        }
    }
}

// =============================================================================
// Backend Error
// =============================================================================

/// Classified backend failure with context and retry hints
#[derive(Debug, Clone)]
pub struct BackendError {
    /// Failure kind for routing decisions
    pub kind: ErrorKind,
    /// Detailed human-readable message
    pub message: String,
    /// Backend that produced the error
    pub backend: Option<String>,
    /// Backend-suggested wait time before retry (if reported)
    pub retry_after: Option<Duration>,
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(backend) = &self.backend {
            write!(f, "[{}:{}] {}", backend, self.kind, self.message)
        } else {
            write!(f, "[{}] {}", self.kind, self.message)
        }
    }
}

impl std::error::Error for BackendError {}

impl BackendError {
    /// Create a new backend error
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: None,
            retry_after: None,
        }
    }

    /// Create error with backend context
    pub fn with_backend(
        kind: ErrorKind,
        message: impl Into<String>,
        backend: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            backend: Some(backend.into()),
            retry_after: None,
        }
    }

    /// Attach backend context to an existing error
    pub fn backend(mut self, backend: impl Into<String>) -> Self {
        self.backend = Some(backend.into());
        self
    }

    /// Attach a suggested retry delay
    pub fn retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    /// Cancellation marker error
    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled by caller")
    }

    /// Check if this error is worth another attempt
    pub fn is_retryable(&self) -> bool {
        self.kind.is_retryable()
    }

    /// Get the delay to honor before the next attempt
    pub fn recommended_delay(&self) -> Duration {
        self.retry_after
            .unwrap_or_else(|| self.kind.recommended_delay())
    }
}

// =============================================================================
// Error Classifier
// =============================================================================

/// Classifies raw backend failures into the fixed taxonomy.
///
/// HTTP status codes are authoritative when available; free-text message
/// matching is the fallback for transport-level failures.
pub struct ErrorClassifier;

impl ErrorClassifier {
    /// Classify an error message from any backend
    pub fn classify(message: &str, backend: &str) -> BackendError {
        let lower = message.to_lowercase();

        // Rate limiting patterns
        if lower.contains("rate limit")
            || lower.contains("429")
            || lower.contains("too many requests")
            || lower.contains("quota exceeded")
        {
            let hint = parse_retry_after(&lower).unwrap_or(Duration::from_secs(30));
            return BackendError::with_backend(ErrorKind::RateLimited, message, backend)
                .retry_after(hint);
        }

        // Authentication patterns
        if lower.contains("401")
            || lower.contains("403")
            || lower.contains("api key")
            || lower.contains("invalid key")
            || lower.contains("unauthorized")
            || lower.contains("authentication")
            || lower.contains("permission denied")
        {
            return BackendError::with_backend(ErrorKind::Authentication, message, backend);
        }

        // Network patterns
        if lower.contains("network")
            || lower.contains("connection")
            || lower.contains("dns")
            || lower.contains("timeout")
            || lower.contains("timed out")
            || lower.contains("unreachable")
        {
            return BackendError::with_backend(ErrorKind::TransientNetwork, message, backend)
                .retry_after(Duration::from_secs(5));
        }

        // Backend-side server trouble
        if lower.contains("503")
            || lower.contains("502")
            || lower.contains("504")
            || lower.contains("500")
            || lower.contains("service unavailable")
            || lower.contains("server error")
            || lower.contains("internal error")
            || lower.contains("overloaded")
        {
            return BackendError::with_backend(ErrorKind::BackendInternal, message, backend)
                .retry_after(Duration::from_secs(2));
        }

        // Bad request patterns
        if lower.contains("400")
            || lower.contains("bad request")
            || lower.contains("invalid")
            || lower.contains("malformed")
            || lower.contains("not supported")
            || lower.contains("unsupported")
        {
            return BackendError::with_backend(ErrorKind::InvalidRequest, message, backend);
        }

        // Unknown failures are treated as server trouble: retryable up to the
        // bound, surfaced with the original message if the bound is hit.
        BackendError::with_backend(ErrorKind::BackendInternal, message, backend)
    }

    /// Classify an HTTP status code directly (more accurate than string matching)
    pub fn classify_http_status(status: u16, message: &str, backend: &str) -> BackendError {
        match status {
            429 => {
                let hint =
                    parse_retry_after(&message.to_lowercase()).unwrap_or(Duration::from_secs(30));
                BackendError::with_backend(ErrorKind::RateLimited, message, backend)
                    .retry_after(hint)
            }
            401 | 403 => BackendError::with_backend(ErrorKind::Authentication, message, backend),
            400 | 404 | 422 => {
                BackendError::with_backend(ErrorKind::InvalidRequest, message, backend)
            }
            500..=599 => BackendError::with_backend(ErrorKind::BackendInternal, message, backend)
                .retry_after(Duration::from_secs(2)),
            _ => Self::classify(message, backend),
        }
    }

    /// Classify a transport-level reqwest failure
    pub fn classify_transport(err: &reqwest::Error, backend: &str) -> BackendError {
        if err.is_timeout() || err.is_connect() {
            BackendError::with_backend(ErrorKind::TransientNetwork, err.to_string(), backend)
                .retry_after(Duration::from_secs(5))
        } else if err.is_builder() || err.is_request() {
            BackendError::with_backend(ErrorKind::InvalidRequest, err.to_string(), backend)
        } else {
            Self::classify(&err.to_string(), backend)
        }
    }
}

/// Parse a retry-after hint out of an error message.
///
/// Handles "retry after N seconds", "retry-after: N" and "wait N seconds"
/// phrasings; the hint is capped to keep a lying backend from stalling a run.
fn parse_retry_after(lower: &str) -> Option<Duration> {
    let cap = crate::constants::retry::MAX_RETRY_AFTER_SECS;

    for pattern in &["retry", "wait ", "in "] {
        if let Some(idx) = lower.find(pattern) {
            let tail = &lower[idx..];
            for word in tail.split_whitespace() {
                let trimmed = word.trim_matches(|c: char| !c.is_ascii_digit());
                if trimmed.is_empty() {
                    continue;
                }
                if let Ok(secs) = trimmed.parse::<u64>() {
                    return Some(Duration::from_secs(secs.min(cap)));
                }
            }
        }
    }

    None
}

// =============================================================================
// Application Error
// =============================================================================

#[derive(Debug, Error)]
pub enum ForgeError {
    // -------------------------------------------------------------------------
    // System Errors (auto From impl)
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // -------------------------------------------------------------------------
    // Backend Errors
    // -------------------------------------------------------------------------
    /// Classified backend failure
    #[error("Backend error: {0}")]
    Backend(BackendError),

    // -------------------------------------------------------------------------
    // Chunking Errors
    // -------------------------------------------------------------------------
    /// Impossible chunking parameters, raised before any backend call
    #[error(
        "Chunking configuration error: overlap of {overlap_tokens} tokens \
         must be smaller than the chunk budget of {max_tokens} tokens"
    )]
    ChunkingConfig {
        max_tokens: u32,
        overlap_tokens: u32,
    },

    // -------------------------------------------------------------------------
    // Domain Errors
    // -------------------------------------------------------------------------
    #[error("Operation timeout after {duration:?}: {operation}")]
    Timeout {
        operation: String,
        duration: Duration,
    },

    #[error("Config error: {0}")]
    Config(String),
}

impl From<BackendError> for ForgeError {
    fn from(err: BackendError) -> Self {
        ForgeError::Backend(err)
    }
}

pub type Result<T> = std::result::Result<T, ForgeError>;

// =============================================================================
// Helper Functions
// =============================================================================

impl ForgeError {
    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a chunking configuration error
    pub fn chunking_config(max_tokens: u32, overlap_tokens: u32) -> Self {
        Self::ChunkingConfig {
            max_tokens,
            overlap_tokens,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
