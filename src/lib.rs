//! ReportForge - LLM-Driven Forensic Report Drafting Core
//!
//! Converts plain-text forensic documents into structured report text by
//! driving interchangeable LLM backends, chunking oversized documents
//! against each model's context budget along the way.
//!
//! ## Core Features
//!
//! - **Token Budgeting**: per-backend token estimation with a bounded,
//!   process-wide memoization cache
//! - **Structure-Preserving Chunking**: heading → paragraph → sentence →
//!   character fallback, with configurable overlap between chunks
//! - **Backend Adapters**: Anthropic, OpenAI and Ollama behind one trait,
//!   selected through a factory; failures classified once at the boundary
//! - **Bounded Retry**: exponential backoff with jitter, rate-limit hints
//!   honored, fatal errors short-circuited
//! - **Sequential Batch Runner**: documents resolve strictly in submission
//!   order with progress events and cooperative cancellation
//!
//! ## Quick Start
//!
//! ```ignore
//! use reportforge::{ConfigLoader, DocumentTaskRunner, RetryPolicy, create_adapter};
//! use reportforge::types::{DocumentInput, GenerationSettings};
//!
//! let config = ConfigLoader::load()?;
//! let profile = config.profile_for("claude-sonnet-4-20250514");
//! let adapter = create_adapter(&config.llm, &profile)?;
//! let runner = DocumentTaskRunner::new(adapter, profile, RetryPolicy::from(&config.retry));
//!
//! let cancel = runner.cancel_handle();
//! let mut events = runner.events().subscribe();
//! let tasks = runner.run_batch(&settings, documents).await;
//! ```
//!
//! ## Modules
//!
//! - [`llm`]: token counting, chunking, backend adapters, retry
//! - [`runner`]: sequential batch orchestration and progress events
//! - [`config`]: layered configuration and the per-model budget table
//! - [`types`]: value types and the unified error taxonomy

pub mod config;
pub mod constants;
pub mod llm;
pub mod runner;
pub mod types;

// =============================================================================
// Core Re-exports
// =============================================================================

// Configuration
pub use config::{BackendConfig, Config, ConfigLoader, ModelProfile, RetryConfig};

// Error Types
pub use types::error::{BackendError, ErrorKind, ForgeError, Result};

// Cancellation
pub use types::CancelHandle;

// =============================================================================
// LLM Re-exports
// =============================================================================

pub use llm::{
    // Chunking
    Chunk,
    Chunker,
    // Adapters
    ProviderAdapter,
    ProviderLimits,
    // Retry
    RetryPolicy,
    RetryingInvoker,
    SharedAdapter,
    // Token accounting
    TokenCounter,
    create_adapter,
};

// =============================================================================
// Runner Re-exports
// =============================================================================

pub use runner::{DocumentTaskRunner, EventSink, TaskEvent};
